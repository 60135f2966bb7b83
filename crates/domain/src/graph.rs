//! Activity-graph types: a typed directed multigraph of sessions, tools,
//! processes, files, and network destinations.
//!
//! Node identity is the pair (node_type, value); edge identity is the triple
//! (source, target, relation). Repeated traversals advance counters and
//! timestamps instead of creating duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Type of node in the activity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Session,
    File,
    Directory,
    Command,
    Process,
    Network,
    Url,
    IpAddress,
    Tool,
    User,
    Alert,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Session => "session",
            NodeType::File => "file",
            NodeType::Directory => "directory",
            NodeType::Command => "command",
            NodeType::Process => "process",
            NodeType::Network => "network",
            NodeType::Url => "url",
            NodeType::IpAddress => "ip_address",
            NodeType::Tool => "tool",
            NodeType::User => "user",
            NodeType::Alert => "alert",
        }
    }

    pub fn parse(s: &str) -> Option<NodeType> {
        match s {
            "session" => Some(NodeType::Session),
            "file" => Some(NodeType::File),
            "directory" => Some(NodeType::Directory),
            "command" => Some(NodeType::Command),
            "process" => Some(NodeType::Process),
            "network" => Some(NodeType::Network),
            "url" => Some(NodeType::Url),
            "ip_address" => Some(NodeType::IpAddress),
            "tool" => Some(NodeType::Tool),
            "user" => Some(NodeType::User),
            "alert" => Some(NodeType::Alert),
            _ => None,
        }
    }
}

/// Type of relationship between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRelation {
    Reads,
    Writes,
    Creates,
    Deletes,
    Modifies,
    Executes,
    Spawns,
    Terminates,
    ConnectsTo,
    DownloadsFrom,
    UploadsTo,
    Fetches,
    Contains,
    ParentOf,
    ChildOf,
    Uses,
    Invokes,
    Triggers,
    RelatedTo,
}

impl EdgeRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeRelation::Reads => "reads",
            EdgeRelation::Writes => "writes",
            EdgeRelation::Creates => "creates",
            EdgeRelation::Deletes => "deletes",
            EdgeRelation::Modifies => "modifies",
            EdgeRelation::Executes => "executes",
            EdgeRelation::Spawns => "spawns",
            EdgeRelation::Terminates => "terminates",
            EdgeRelation::ConnectsTo => "connects_to",
            EdgeRelation::DownloadsFrom => "downloads_from",
            EdgeRelation::UploadsTo => "uploads_to",
            EdgeRelation::Fetches => "fetches",
            EdgeRelation::Contains => "contains",
            EdgeRelation::ParentOf => "parent_of",
            EdgeRelation::ChildOf => "child_of",
            EdgeRelation::Uses => "uses",
            EdgeRelation::Invokes => "invokes",
            EdgeRelation::Triggers => "triggers",
            EdgeRelation::RelatedTo => "related_to",
        }
    }

    pub fn parse(s: &str) -> Option<EdgeRelation> {
        match s {
            "reads" => Some(EdgeRelation::Reads),
            "writes" => Some(EdgeRelation::Writes),
            "creates" => Some(EdgeRelation::Creates),
            "deletes" => Some(EdgeRelation::Deletes),
            "modifies" => Some(EdgeRelation::Modifies),
            "executes" => Some(EdgeRelation::Executes),
            "spawns" => Some(EdgeRelation::Spawns),
            "terminates" => Some(EdgeRelation::Terminates),
            "connects_to" => Some(EdgeRelation::ConnectsTo),
            "downloads_from" => Some(EdgeRelation::DownloadsFrom),
            "uploads_to" => Some(EdgeRelation::UploadsTo),
            "fetches" => Some(EdgeRelation::Fetches),
            "contains" => Some(EdgeRelation::Contains),
            "parent_of" => Some(EdgeRelation::ParentOf),
            "child_of" => Some(EdgeRelation::ChildOf),
            "uses" => Some(EdgeRelation::Uses),
            "invokes" => Some(EdgeRelation::Invokes),
            "triggers" => Some(EdgeRelation::Triggers),
            "related_to" => Some(EdgeRelation::RelatedTo),
            _ => None,
        }
    }
}

/// Hostname portion of a URL, used as the display label for URL nodes.
/// Falls back to the input when it does not look like a URL.
pub fn url_hostname(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    // Drop userinfo and port.
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        url.to_string()
    } else {
        host.to_string()
    }
}

/// A node in the activity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: Uuid,
    pub node_type: NodeType,
    /// Display label (file basename, hostname, tool name).
    pub label: String,
    /// Identity value (path, full command, URL).
    pub value: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub access_count: i64,
    pub alert_count: i64,
    pub session_ids: Vec<String>,
    pub event_ids: Vec<Uuid>,
    pub size: f64,
    pub color: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}

impl GraphNode {
    pub fn new(
        node_type: NodeType,
        label: impl Into<String>,
        value: impl Into<String>,
    ) -> GraphNode {
        let now = Utc::now();
        GraphNode {
            id: Uuid::new_v4(),
            node_type,
            label: label.into(),
            value: value.into(),
            first_seen: now,
            last_seen: now,
            access_count: 1,
            alert_count: 0,
            session_ids: Vec::new(),
            event_ids: Vec::new(),
            size: 1.0,
            color: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// An edge (relationship) in the activity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation: EdgeRelation,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: i64,
    pub session_ids: Vec<String>,
    pub event_ids: Vec<Uuid>,
    pub weight: f64,
    pub color: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}

impl GraphEdge {
    pub fn new(source_id: Uuid, target_id: Uuid, relation: EdgeRelation) -> GraphEdge {
        let now = Utc::now();
        GraphEdge {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            relation,
            first_seen: now,
            last_seen: now,
            count: 1,
            session_ids: Vec::new(),
            event_ids: Vec::new(),
            weight: 1.0,
            color: None,
            metadata: serde_json::Map::new(),
        }
    }
}
