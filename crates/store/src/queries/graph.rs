//! Activity-graph persistence: idempotent node/edge upserts and the
//! session, global, and alert-subgraph read queries.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use al_domain::{EdgeRelation, GraphEdge, GraphNode, NodeType};

use crate::error::Result;
use crate::records::GraphView;
use crate::{fmt_ts, from_json, parse_ts, parse_uuid, Store};

fn row_to_node(row: &Row) -> rusqlite::Result<GraphNode> {
    let event_ids: Vec<String> = from_json(row.get("event_ids")?);
    Ok(GraphNode {
        id: parse_uuid(&row.get::<_, String>("id")?),
        node_type: NodeType::parse(&row.get::<_, String>("node_type")?)
            .unwrap_or(NodeType::File),
        label: row.get("label")?,
        value: row.get("value")?,
        first_seen: parse_ts(&row.get::<_, String>("first_seen")?),
        last_seen: parse_ts(&row.get::<_, String>("last_seen")?),
        access_count: row.get("access_count")?,
        alert_count: row.get("alert_count")?,
        session_ids: from_json(row.get("session_ids")?),
        event_ids: event_ids.iter().map(|s| parse_uuid(s)).collect(),
        size: row.get("size")?,
        color: row.get("color")?,
        metadata: from_json(row.get("metadata")?),
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<GraphEdge> {
    let event_ids: Vec<String> = from_json(row.get("event_ids")?);
    Ok(GraphEdge {
        id: parse_uuid(&row.get::<_, String>("id")?),
        source_id: parse_uuid(&row.get::<_, String>("source_id")?),
        target_id: parse_uuid(&row.get::<_, String>("target_id")?),
        relation: EdgeRelation::parse(&row.get::<_, String>("relation")?)
            .unwrap_or(EdgeRelation::RelatedTo),
        first_seen: parse_ts(&row.get::<_, String>("first_seen")?),
        last_seen: parse_ts(&row.get::<_, String>("last_seen")?),
        count: row.get("count")?,
        session_ids: from_json(row.get("session_ids")?),
        event_ids: event_ids.iter().map(|s| parse_uuid(s)).collect(),
        weight: row.get("weight")?,
        color: row.get("color")?,
        metadata: from_json(row.get("metadata")?),
    })
}

impl Store {
    /// Upsert a node by (node_type, value). The conflict branch advances
    /// last_seen, bumps access_count, folds alert_count, overwrites the
    /// session/event id lists with the incoming value, and grows size.
    ///
    /// Returns the effective node id, which differs from the proposed id
    /// when the node already existed. Callers must emit edges against the
    /// returned id.
    pub fn save_graph_node(&self, node: &GraphNode) -> Result<Uuid> {
        let event_ids: Vec<String> = node.event_ids.iter().map(Uuid::to_string).collect();
        self.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO graph_nodes (
                    id, node_type, label, value, first_seen, last_seen,
                    access_count, alert_count, session_ids, event_ids,
                    size, color, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(node_type, value) DO UPDATE SET
                    last_seen = excluded.last_seen,
                    access_count = access_count + 1,
                    alert_count = alert_count + excluded.alert_count,
                    session_ids = excluded.session_ids,
                    event_ids = excluded.event_ids,
                    size = size + 1
                "#,
                params![
                    node.id.to_string(),
                    node.node_type.as_str(),
                    node.label,
                    node.value,
                    fmt_ts(&node.first_seen),
                    fmt_ts(&node.last_seen),
                    node.access_count,
                    node.alert_count,
                    serde_json::to_string(&node.session_ids)?,
                    serde_json::to_string(&event_ids)?,
                    node.size,
                    node.color,
                    serde_json::to_string(&node.metadata)?,
                ],
            )?;
            let id: String = tx.query_row(
                "SELECT id FROM graph_nodes WHERE node_type = ?1 AND value = ?2",
                params![node.node_type.as_str(), node.value],
                |row| row.get(0),
            )?;
            Ok(parse_uuid(&id))
        })
    }

    /// Upsert an edge by (source, target, relation). Conflicts advance
    /// last_seen, count, and weight instead of creating a new edge.
    pub fn save_graph_edge(&self, edge: &GraphEdge) -> Result<()> {
        let event_ids: Vec<String> = edge.event_ids.iter().map(Uuid::to_string).collect();
        self.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO graph_edges (
                    id, source_id, target_id, relation, first_seen, last_seen,
                    count, session_ids, event_ids, weight, color, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(source_id, target_id, relation) DO UPDATE SET
                    last_seen = excluded.last_seen,
                    count = count + 1,
                    session_ids = excluded.session_ids,
                    event_ids = excluded.event_ids,
                    weight = weight + 1
                "#,
                params![
                    edge.id.to_string(),
                    edge.source_id.to_string(),
                    edge.target_id.to_string(),
                    edge.relation.as_str(),
                    fmt_ts(&edge.first_seen),
                    fmt_ts(&edge.last_seen),
                    edge.count,
                    serde_json::to_string(&edge.session_ids)?,
                    serde_json::to_string(&event_ids)?,
                    edge.weight,
                    edge.color,
                    serde_json::to_string(&edge.metadata)?,
                ],
            )?;
            Ok(())
        })
    }

    /// All nodes touched by a session plus the edges whose both endpoints
    /// are in that node set.
    pub fn get_session_graph(&self, session_id: &str) -> Result<GraphView> {
        self.with_conn(|conn| {
            let needle = format!("%\"{session_id}\"%");
            let mut stmt = conn.prepare(
                "SELECT * FROM graph_nodes WHERE session_ids LIKE ?1 \
                 ORDER BY access_count DESC",
            )?;
            let nodes = stmt
                .query_map([needle], row_to_node)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let edges = edges_among(conn, &nodes)?;
            Ok(GraphView { nodes, edges })
        })
    }

    /// Up to `limit_nodes` highest-access nodes active in the window, plus
    /// the edges between them. Endpoint/source filters resolve the allowed
    /// session-id set first and keep only intersecting nodes.
    pub fn get_global_graph(
        &self,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
        limit_nodes: i64,
        endpoint: Option<&str>,
        session_source: Option<&str>,
    ) -> Result<GraphView> {
        let mut allowed: Option<HashSet<String>> = None;
        if let Some(endpoint) = endpoint {
            let ids = self.session_ids_for_endpoint(endpoint)?;
            if ids.is_empty() {
                return Ok(GraphView::empty());
            }
            allowed = Some(ids.into_iter().collect());
        }
        if let Some(source) = session_source {
            let ids: HashSet<String> =
                self.session_ids_for_source(source)?.into_iter().collect();
            if ids.is_empty() {
                return Ok(GraphView::empty());
            }
            allowed = Some(match allowed {
                Some(existing) => existing.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }

        self.with_conn(|conn| {
            let mut query = String::from("SELECT * FROM graph_nodes WHERE 1=1");
            let mut params_vec: Vec<String> = Vec::new();
            if let Some(from) = from_date {
                query.push_str(" AND last_seen >= ?");
                params_vec.push(fmt_ts(from));
            }
            if let Some(to) = to_date {
                query.push_str(" AND last_seen <= ?");
                params_vec.push(fmt_ts(to));
            }
            query.push_str(&format!(" ORDER BY access_count DESC LIMIT {limit_nodes}"));

            let mut stmt = conn.prepare(&query)?;
            let mut nodes = stmt
                .query_map(rusqlite::params_from_iter(&params_vec), row_to_node)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            if let Some(allowed) = &allowed {
                nodes.retain(|n| n.session_ids.iter().any(|sid| allowed.contains(sid)));
            }

            let edges = edges_among(conn, &nodes)?;
            Ok(GraphView { nodes, edges })
        })
    }

    /// Subgraph for an alert: the nodes containing any triggering event id,
    /// their ancestors along reverse edges, the direct children of the
    /// triggering nodes, and the induced edges.
    pub fn get_alert_subgraph(&self, event_ids: &[Uuid]) -> Result<GraphView> {
        if event_ids.is_empty() {
            return Ok(GraphView::empty());
        }
        self.with_conn(|conn| {
            // Nodes referencing any triggering event.
            let clauses = vec!["event_ids LIKE ?"; event_ids.len()].join(" OR ");
            let needles: Vec<String> = event_ids
                .iter()
                .map(|id| format!("%\"{id}\"%"))
                .collect();
            let mut stmt =
                conn.prepare(&format!("SELECT * FROM graph_nodes WHERE {clauses}"))?;
            let trigger_nodes = stmt
                .query_map(rusqlite::params_from_iter(&needles), row_to_node)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if trigger_nodes.is_empty() {
                return Ok(GraphView::empty());
            }

            let all_edges = load_all_edges(conn)?;
            let trigger_ids: HashSet<Uuid> = trigger_nodes.iter().map(|n| n.id).collect();
            let mut included: HashSet<Uuid> = trigger_ids.clone();

            // Walk parents to the root along reverse edges.
            loop {
                let before = included.len();
                for edge in &all_edges {
                    if included.contains(&edge.target_id) {
                        included.insert(edge.source_id);
                    }
                }
                if included.len() == before {
                    break;
                }
            }

            // Direct children of the triggering nodes.
            for edge in &all_edges {
                if trigger_ids.contains(&edge.source_id) {
                    included.insert(edge.target_id);
                }
            }

            let nodes = load_nodes_by_ids(conn, &included)?;
            let edges = all_edges
                .into_iter()
                .filter(|e| included.contains(&e.source_id) && included.contains(&e.target_id))
                .collect();
            Ok(GraphView { nodes, edges })
        })
    }
}

fn edges_among(
    conn: &rusqlite::Connection,
    nodes: &[GraphNode],
) -> rusqlite::Result<Vec<GraphEdge>> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = nodes.iter().map(|n| n.id.to_string()).collect();
    let placeholders = vec!["?"; ids.len()].join(",");
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM graph_edges \
         WHERE source_id IN ({placeholders}) AND target_id IN ({placeholders})"
    ))?;
    let bound: Vec<&String> = ids.iter().chain(ids.iter()).collect();
    let result = stmt
        .query_map(rusqlite::params_from_iter(bound), row_to_edge)?
        .collect();
    result
}

fn load_all_edges(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<GraphEdge>> {
    let mut stmt = conn.prepare("SELECT * FROM graph_edges")?;
    let result = stmt.query_map([], row_to_edge)?.collect();
    result
}

fn load_nodes_by_ids(
    conn: &rusqlite::Connection,
    ids: &HashSet<Uuid>,
) -> rusqlite::Result<Vec<GraphNode>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    let placeholders = vec!["?"; id_strings.len()].join(",");
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM graph_nodes WHERE id IN ({placeholders}) \
         ORDER BY access_count DESC"
    ))?;
    let result = stmt
        .query_map(rusqlite::params_from_iter(&id_strings), row_to_node)?
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: NodeType, value: &str, session: &str, event: Uuid) -> GraphNode {
        let mut n = GraphNode::new(node_type, value, value);
        n.session_ids = vec![session.to_string()];
        n.event_ids = vec![event];
        n
    }

    #[test]
    fn node_upsert_is_idempotent_by_identity() {
        let store = Store::open_in_memory().unwrap();
        let event = Uuid::new_v4();

        let first = node(NodeType::File, "/tmp/x.sh", "s1", event);
        let first_id = store.save_graph_node(&first).unwrap();
        assert_eq!(first_id, first.id);

        // Second upsert proposes a fresh id for the same identity.
        let second = node(NodeType::File, "/tmp/x.sh", "s2", event);
        let effective = store.save_graph_node(&second).unwrap();
        assert_eq!(effective, first.id);

        let graph = store.get_session_graph("s2").unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].access_count, 2);
        assert_eq!(graph.nodes[0].session_ids, vec!["s2"]);
    }

    #[test]
    fn same_value_different_type_is_a_different_node() {
        let store = Store::open_in_memory().unwrap();
        let event = Uuid::new_v4();
        let a = store
            .save_graph_node(&node(NodeType::File, "x", "s1", event))
            .unwrap();
        let b = store
            .save_graph_node(&node(NodeType::Command, "x", "s1", event))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn edge_upsert_increments_count() {
        let store = Store::open_in_memory().unwrap();
        let event = Uuid::new_v4();
        let source = store
            .save_graph_node(&node(NodeType::Tool, "Bash:s1", "s1", event))
            .unwrap();
        let target = store
            .save_graph_node(&node(NodeType::File, "/tmp/x", "s1", event))
            .unwrap();

        let edge = GraphEdge::new(source, target, EdgeRelation::Writes);
        store.save_graph_edge(&edge).unwrap();
        let mut repeat = GraphEdge::new(source, target, EdgeRelation::Writes);
        repeat.session_ids = vec!["s1".to_string()];
        store.save_graph_edge(&repeat).unwrap();

        let graph = store.get_session_graph("s1").unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].count, 2);
        assert_eq!(graph.edges[0].id, edge.id);
    }

    #[test]
    fn session_graph_excludes_edges_leaving_the_set() {
        let store = Store::open_in_memory().unwrap();
        let event = Uuid::new_v4();
        let inside = store
            .save_graph_node(&node(NodeType::Tool, "Bash:s1", "s1", event))
            .unwrap();
        let outside = store
            .save_graph_node(&node(NodeType::File, "/other", "s2", event))
            .unwrap();
        store
            .save_graph_edge(&GraphEdge::new(inside, outside, EdgeRelation::Reads))
            .unwrap();

        let graph = store.get_session_graph("s1").unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn global_graph_endpoint_filter_without_sessions_is_empty() {
        let store = Store::open_in_memory().unwrap();
        let event = Uuid::new_v4();
        store
            .save_graph_node(&node(NodeType::File, "/tmp/x", "s1", event))
            .unwrap();
        let graph = store
            .get_global_graph(None, None, 100, Some("unknown-host"), None)
            .unwrap();
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn alert_subgraph_walks_parents_and_children() {
        let store = Store::open_in_memory().unwrap();
        let trigger_event = Uuid::new_v4();
        let other_event = Uuid::new_v4();

        // session -> tool -> process -> file, with the process node carrying
        // the triggering event.
        let session = store
            .save_graph_node(&node(NodeType::Session, "s1", "s1", other_event))
            .unwrap();
        let tool = store
            .save_graph_node(&node(NodeType::Tool, "Bash:s1", "s1", other_event))
            .unwrap();
        let process = store
            .save_graph_node(&node(NodeType::Process, "curl -o /tmp/x", "s1", trigger_event))
            .unwrap();
        let file = store
            .save_graph_node(&node(NodeType::File, "/tmp/x", "s1", other_event))
            .unwrap();
        let unrelated = store
            .save_graph_node(&node(NodeType::File, "/unrelated", "s9", other_event))
            .unwrap();

        store
            .save_graph_edge(&GraphEdge::new(session, tool, EdgeRelation::Uses))
            .unwrap();
        store
            .save_graph_edge(&GraphEdge::new(tool, process, EdgeRelation::Executes))
            .unwrap();
        store
            .save_graph_edge(&GraphEdge::new(process, file, EdgeRelation::Writes))
            .unwrap();

        let graph = store.get_alert_subgraph(&[trigger_event]).unwrap();
        let ids: HashSet<Uuid> = graph.nodes.iter().map(|n| n.id).collect();
        assert!(ids.contains(&session));
        assert!(ids.contains(&tool));
        assert!(ids.contains(&process));
        assert!(ids.contains(&file));
        assert!(!ids.contains(&unrelated));
        assert_eq!(graph.edges.len(), 3);
    }
}
