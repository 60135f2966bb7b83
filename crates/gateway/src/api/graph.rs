//! Activity-graph read API: per-session and global views, with optional
//! directory clustering for the global view.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use al_domain::{EdgeRelation, GraphNode, NodeType};
use al_store::GraphView;

use super::ApiResult;
use crate::state::AppState;

/// GET /api/graph/session/:id
pub async fn session_graph(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let graph = state.store.get_session_graph(&session_id)?;
    Ok(Json(graph))
}

fn default_limit_nodes() -> i64 {
    500
}

#[derive(Debug, Deserialize)]
pub struct GlobalGraphQuery {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    #[serde(default = "default_limit_nodes")]
    pub limit_nodes: i64,
    pub endpoint: Option<String>,
    pub session_source: Option<String>,
    #[serde(default)]
    pub cluster_dirs: bool,
}

/// GET /api/graph/global
pub async fn global_graph(
    State(state): State<AppState>,
    Query(query): Query<GlobalGraphQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut graph = state.store.get_global_graph(
        query.from_date.as_ref(),
        query.to_date.as_ref(),
        query.limit_nodes.clamp(1, 5000),
        query.endpoint.as_deref(),
        query.session_source.as_deref(),
    )?;
    if query.cluster_dirs {
        graph = cluster_directories(graph);
    }
    Ok(Json(graph))
}

fn parent_directory(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        Some("/".to_string())
    } else {
        Some(trimmed[..idx].to_string())
    }
}

/// Collapse file nodes into per-directory nodes. Edges to the collapsed
/// files are re-pointed at the directory node and merged by
/// (source, target, relation), so the clustered view keeps the multigraph
/// identity invariant.
fn cluster_directories(graph: GraphView) -> GraphView {
    let mut nodes: Vec<GraphNode> = Vec::new();
    // file node id -> directory node id
    let mut remap: HashMap<Uuid, Uuid> = HashMap::new();
    let mut directories: HashMap<String, usize> = HashMap::new();

    for node in graph.nodes {
        if node.node_type != NodeType::File {
            nodes.push(node);
            continue;
        }
        let Some(directory) = parent_directory(&node.value) else {
            nodes.push(node);
            continue;
        };

        let index = *directories.entry(directory.clone()).or_insert_with(|| {
            let label = directory
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("/");
            let mut dir_node = GraphNode::new(NodeType::Directory, label, &directory);
            dir_node.access_count = 0;
            dir_node.first_seen = node.first_seen;
            dir_node.last_seen = node.last_seen;
            nodes.push(dir_node);
            nodes.len() - 1
        });

        let dir_node = &mut nodes[index];
        remap.insert(node.id, dir_node.id);
        dir_node.access_count += node.access_count;
        dir_node.alert_count += node.alert_count;
        dir_node.first_seen = dir_node.first_seen.min(node.first_seen);
        dir_node.last_seen = dir_node.last_seen.max(node.last_seen);
        for session_id in node.session_ids {
            if !dir_node.session_ids.contains(&session_id) {
                dir_node.session_ids.push(session_id);
            }
        }
        for event_id in node.event_ids {
            if !dir_node.event_ids.contains(&event_id) {
                dir_node.event_ids.push(event_id);
            }
        }
    }

    // Re-point and merge edges.
    let mut merged: HashMap<(Uuid, Uuid, EdgeRelation), al_domain::GraphEdge> = HashMap::new();
    for mut edge in graph.edges {
        if let Some(mapped) = remap.get(&edge.source_id) {
            edge.source_id = *mapped;
        }
        if let Some(mapped) = remap.get(&edge.target_id) {
            edge.target_id = *mapped;
        }
        let key = (edge.source_id, edge.target_id, edge.relation);
        match merged.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.count += edge.count;
                existing.weight += edge.weight;
                existing.last_seen = existing.last_seen.max(edge.last_seen);
                existing.first_seen = existing.first_seen.min(edge.first_seen);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(edge);
            }
        }
    }

    GraphView {
        nodes,
        edges: merged.into_values().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_directory_handles_root_and_nested() {
        assert_eq!(parent_directory("/tmp/x.sh"), Some("/tmp".to_string()));
        assert_eq!(parent_directory("/x"), Some("/".to_string()));
        assert_eq!(parent_directory("relative.txt"), None);
        assert_eq!(
            parent_directory("/a/b/c.txt"),
            Some("/a/b".to_string())
        );
    }

    #[test]
    fn clustering_merges_files_in_one_directory() {
        let mut file_a = GraphNode::new(NodeType::File, "a", "/tmp/a");
        file_a.session_ids = vec!["s1".to_string()];
        let mut file_b = GraphNode::new(NodeType::File, "b", "/tmp/b");
        file_b.session_ids = vec!["s2".to_string()];
        let tool = GraphNode::new(NodeType::Tool, "Bash", "Bash:s1");

        let edges = vec![
            al_domain::GraphEdge::new(tool.id, file_a.id, EdgeRelation::Writes),
            al_domain::GraphEdge::new(tool.id, file_b.id, EdgeRelation::Writes),
        ];
        let graph = GraphView {
            nodes: vec![tool.clone(), file_a, file_b],
            edges,
        };

        let clustered = cluster_directories(graph);
        let dirs: Vec<&GraphNode> = clustered
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Directory)
            .collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].value, "/tmp");
        assert_eq!(dirs[0].access_count, 2);
        assert_eq!(dirs[0].session_ids.len(), 2);
        // The two writes collapse into one edge with a summed count.
        assert_eq!(clustered.edges.len(), 1);
        assert_eq!(clustered.edges[0].count, 2);
    }
}
