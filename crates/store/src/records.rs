//! Query parameter and result types for the store's read side.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use al_domain::{EventCategory, GraphEdge, GraphNode, Severity};

/// One page of results plus the total row count for the same filter.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub session_source: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub tool_name: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub session_id: Option<String>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub policy_id: Option<Uuid>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub events_by_category: BTreeMap<String, i64>,
    pub events_by_severity: BTreeMap<String, i64>,
    pub alerts_by_severity: BTreeMap<String, i64>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct AlertSummary {
    pub id: Uuid,
    pub title: String,
    pub severity: Severity,
    pub status: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub id: Uuid,
    pub tool_name: Option<String>,
    pub category: EventCategory,
    pub severity: Severity,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_sessions: i64,
    pub active_sessions: i64,
    pub total_events: i64,
    pub total_alerts: i64,
    pub new_alerts: i64,
    pub blocked_actions: i64,
    pub alerts_by_severity: BTreeMap<String, i64>,
    pub events_by_category: BTreeMap<String, i64>,
    pub recent_alerts: Vec<AlertSummary>,
    pub recent_events: Vec<EventSummary>,
    pub sessions_by_source: BTreeMap<String, i64>,
}

impl DashboardStats {
    /// All-zero payload with every severity and category key present, used
    /// when an endpoint filter matches no sessions.
    pub fn empty() -> DashboardStats {
        DashboardStats {
            total_sessions: 0,
            active_sessions: 0,
            total_events: 0,
            total_alerts: 0,
            new_alerts: 0,
            blocked_actions: 0,
            alerts_by_severity: zero_severity_map(),
            events_by_category: zero_category_map(),
            recent_alerts: Vec::new(),
            recent_events: Vec::new(),
            sessions_by_source: BTreeMap::new(),
        }
    }
}

pub(crate) fn zero_severity_map() -> BTreeMap<String, i64> {
    Severity::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect()
}

pub(crate) fn zero_category_map() -> BTreeMap<String, i64> {
    EventCategory::ALL
        .iter()
        .map(|c| (c.as_str().to_string(), 0))
        .collect()
}

#[derive(Debug, Serialize)]
pub struct TimelinePoint {
    pub timestamp: DateTime<Utc>,
    pub events: i64,
    pub alerts: i64,
}

#[derive(Debug, Serialize)]
pub struct TimelineStats {
    pub points: Vec<TimelinePoint>,
    pub total_events: i64,
    pub total_alerts: i64,
    pub interval: String,
}

#[derive(Debug, Serialize)]
pub struct TopFile {
    pub file_path: String,
    pub read_count: i64,
    pub write_count: i64,
    pub delete_count: i64,
    pub total_access: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub alert_count: i64,
}

#[derive(Debug, Serialize)]
pub struct TopCommand {
    pub command: String,
    pub execution_count: i64,
    pub last_executed: Option<DateTime<Utc>>,
    pub alert_count: i64,
}

#[derive(Debug, Serialize)]
pub struct TopDomain {
    pub hostname: String,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub alert_count: i64,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub endpoint_hostname: Option<String>,
    pub endpoint_user: Option<String>,
    pub session_count: i64,
    pub total_events: i64,
    pub total_alerts: i64,
    pub session_source: Option<String>,
}

/// Nodes and edges returned by the graph queries.
#[derive(Debug, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphView {
    pub fn empty() -> GraphView {
        GraphView {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}
