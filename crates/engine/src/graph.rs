//! Graph builder: turns one enriched event into idempotent node/edge
//! upserts forming a readable attack-chain hierarchy.
//!
//! ```text
//! Session ──uses──▶ Tool ──executes──▶ CommandGroup ──executes──▶ Process
//!                    │                                              ├──writes/reads/executes──▶ File
//!                    └──reads/writes/deletes──▶ File                └──connects_to──▶ URL
//!                    └──connects_to──▶ URL  (when no process)
//! ```
//!
//! Tool and command-group nodes are scoped per session so each session has
//! its own subtree; process nodes are keyed on the full command string and
//! intentionally shared across sessions. `save_graph_node` returns the
//! effective id on conflict, and every edge is emitted against that id.

use al_domain::{graph::url_hostname, EdgeRelation, Event, EventCategory, GraphEdge, GraphNode, NodeType};
use al_store::Store;
use uuid::Uuid;

use crate::classifier::{extract_command_file_refs, FileRole};

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn node_for(event: &Event, node_type: NodeType, label: &str, value: &str) -> GraphNode {
    let mut node = GraphNode::new(node_type, label, value);
    node.session_ids = vec![event.session_id.clone()];
    node.event_ids = vec![event.id];
    node
}

fn edge_for(event: &Event, source: Uuid, target: Uuid, relation: EdgeRelation) -> GraphEdge {
    let mut edge = GraphEdge::new(source, target, relation);
    edge.session_ids = vec![event.session_id.clone()];
    edge.event_ids = vec![event.id];
    edge
}

/// Upsert the nodes and edges for one enriched event.
pub fn build_graph(store: &Store, event: &Event) -> al_store::Result<()> {
    let sid = &event.session_id;

    // Session node, always.
    let session_node = node_for(
        event,
        NodeType::Session,
        &sid.chars().take(16).collect::<String>(),
        sid,
    );
    let session_id = store.save_graph_node(&session_node)?;

    // Tool node, scoped per session so sessions do not share subtrees.
    let mut parent_id = session_id;
    if let Some(tool_name) = event.tool_name.as_deref() {
        let tool_node = node_for(
            event,
            NodeType::Tool,
            tool_name,
            &format!("{tool_name}:{sid}"),
        );
        let tool_id = store.save_graph_node(&tool_node)?;
        store.save_graph_edge(&edge_for(event, session_id, tool_id, EdgeRelation::Uses))?;
        parent_id = tool_id;
    }

    // Direct file edges only when no command is present; command events get
    // more precise process → file edges below.
    if event.commands.is_empty() {
        for path in &event.file_paths {
            let label = basename(path);
            let file_node = node_for(
                event,
                NodeType::File,
                if label.is_empty() { path } else { label },
                path,
            );
            let file_id = store.save_graph_node(&file_node)?;

            let relation = match event.category {
                EventCategory::FileWrite => EdgeRelation::Writes,
                EventCategory::FileDelete => EdgeRelation::Deletes,
                _ => EdgeRelation::Reads,
            };
            store.save_graph_edge(&edge_for(event, parent_id, file_id, relation))?;
        }
    }

    // Command hierarchy: Tool → CommandGroup (base command) → Process.
    let mut process_ids: Vec<Uuid> = Vec::new();
    for command in &event.commands {
        let base = command
            .split_whitespace()
            .next()
            .map(basename)
            .filter(|b| !b.is_empty())
            .unwrap_or("unknown");

        let group_node = node_for(
            event,
            NodeType::Command,
            base,
            &format!("cmdgroup:{base}:{sid}"),
        );
        let group_id = store.save_graph_node(&group_node)?;
        store.save_graph_edge(&edge_for(event, parent_id, group_id, EdgeRelation::Executes))?;

        let short_label: String = if command.chars().count() > 60 {
            format!("{}...", command.chars().take(60).collect::<String>())
        } else {
            command.clone()
        };
        let process_node = node_for(event, NodeType::Process, &short_label, command);
        let process_id = store.save_graph_node(&process_node)?;
        process_ids.push(process_id);
        store.save_graph_edge(&edge_for(event, group_id, process_id, EdgeRelation::Executes))?;

        // Data-flow edges from the command's file references.
        for file_ref in extract_command_file_refs(command) {
            let label = basename(&file_ref.path);
            let file_node = node_for(
                event,
                NodeType::File,
                if label.is_empty() { &file_ref.path } else { label },
                &file_ref.path,
            );
            let file_id = store.save_graph_node(&file_node)?;

            let relation = match file_ref.role {
                FileRole::Writes => EdgeRelation::Writes,
                FileRole::Executes => EdgeRelation::Executes,
                FileRole::Reads => EdgeRelation::Reads,
            };
            store.save_graph_edge(&edge_for(event, process_id, file_id, relation))?;
        }
    }

    // URL nodes: hang off the process when one exists, else off the parent,
    // so the chain reads Session → Tool → Process → URL.
    for url in &event.urls {
        let url_node = node_for(event, NodeType::Url, &url_hostname(url), url);
        let url_id = store.save_graph_node(&url_node)?;

        if process_ids.is_empty() {
            store.save_graph_edge(&edge_for(event, parent_id, url_id, EdgeRelation::ConnectsTo))?;
        } else {
            for process_id in &process_ids {
                store.save_graph_edge(&edge_for(
                    event,
                    *process_id,
                    url_id,
                    EdgeRelation::ConnectsTo,
                ))?;
            }
        }
    }

    Ok(())
}
