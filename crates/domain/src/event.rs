//! Hook payloads, events, sessions, and pre-tool decisions.
//!
//! Hook integrations POST open-ended JSON: a known header (session id, hook
//! kind, tool name/input/result) plus whatever extra fields the agent runtime
//! includes. The header is strongly typed here; the tail is kept verbatim in
//! `raw_payload` so policies can match on it by dotted path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Category of an event based on the action being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    FileRead,
    FileWrite,
    FileDelete,
    CommandExec,
    NetworkAccess,
    CodeExecution,
    SubagentSpawn,
    McpToolUse,
    SessionLifecycle,
    Unknown,
}

impl EventCategory {
    pub const ALL: [EventCategory; 10] = [
        EventCategory::FileRead,
        EventCategory::FileWrite,
        EventCategory::FileDelete,
        EventCategory::CommandExec,
        EventCategory::NetworkAccess,
        EventCategory::CodeExecution,
        EventCategory::SubagentSpawn,
        EventCategory::McpToolUse,
        EventCategory::SessionLifecycle,
        EventCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::FileRead => "file_read",
            EventCategory::FileWrite => "file_write",
            EventCategory::FileDelete => "file_delete",
            EventCategory::CommandExec => "command_exec",
            EventCategory::NetworkAccess => "network_access",
            EventCategory::CodeExecution => "code_execution",
            EventCategory::SubagentSpawn => "subagent_spawn",
            EventCategory::McpToolUse => "mcp_tool_use",
            EventCategory::SessionLifecycle => "session_lifecycle",
            EventCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<EventCategory> {
        EventCategory::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// Severity level for events and alerts.
///
/// Variant order defines the lattice: `Info < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        Severity::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

/// Lifecycle status of a monitored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<SessionStatus> {
        match s {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hook payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Payload received from agent hook integrations.
///
/// Accepts both the agent's native field names and our internal names:
/// `cwd` → `session_cwd`, `hook_event_name` → `hook_type`,
/// `tool_response` → `tool_result`, `sensor_timestamp` → `timestamp`.
/// Unknown fields land in `extra` and are preserved in `raw_payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookPayload {
    pub session_id: String,

    #[serde(default, alias = "cwd")]
    pub session_cwd: Option<String>,

    #[serde(default = "default_hook_type", alias = "hook_event_name")]
    pub hook_type: String,

    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Map<String, Value>>,
    #[serde(default, alias = "tool_response")]
    pub tool_result: Option<serde_json::Map<String, Value>>,

    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,

    #[serde(default, alias = "sensor_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub parent_session_id: Option<String>,

    #[serde(default)]
    pub endpoint_hostname: Option<String>,
    #[serde(default)]
    pub endpoint_user: Option<String>,
    #[serde(default)]
    pub session_source: Option<String>,

    /// Free-form tail preserved verbatim. BTreeMap keeps serialization stable.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_hook_type() -> String {
    "unknown".to_string()
}

impl HookPayload {
    /// The payload as a JSON object, including the free-form tail.
    pub fn to_raw(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One monitored agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// External session id supplied by the agent.
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub parent_session_id: Option<String>,
    pub event_count: i64,
    pub alert_count: i64,
    pub risk_score: i64,
    pub status: SessionStatus,
    pub endpoint_hostname: Option<String>,
    pub endpoint_user: Option<String>,
    pub session_source: Option<String>,
}

impl Session {
    /// New active session from a hook payload. Origin fields (hostname, user,
    /// source) are resolved by the collector before calling this.
    pub fn new(session_id: impl Into<String>) -> Self {
        Session {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            started_at: Utc::now(),
            ended_at: None,
            cwd: None,
            parent_session_id: None,
            event_count: 0,
            alert_count: 0,
            risk_score: 0,
            status: SessionStatus::Active,
            endpoint_hostname: None,
            endpoint_user: None,
            session_source: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An immutable record of one hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,

    pub hook_type: String,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Map<String, Value>>,
    pub tool_result: Option<serde_json::Map<String, Value>>,

    pub category: EventCategory,
    pub severity: Severity,

    pub file_paths: Vec<String>,
    pub commands: Vec<String>,
    pub urls: Vec<String>,
    pub ip_addresses: Vec<String>,

    pub processed: bool,
    pub enriched: bool,

    pub raw_payload: Option<serde_json::Map<String, Value>>,
}

impl Event {
    pub fn from_payload(payload: &HookPayload) -> Event {
        Event {
            id: Uuid::new_v4(),
            session_id: payload.session_id.clone(),
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
            hook_type: payload.hook_type.clone(),
            tool_name: payload.tool_name.clone(),
            tool_input: payload.tool_input.clone(),
            tool_result: payload.tool_result.clone(),
            category: EventCategory::Unknown,
            severity: Severity::Info,
            file_paths: Vec::new(),
            commands: Vec::new(),
            urls: Vec::new(),
            ip_addresses: Vec::new(),
            processed: false,
            enriched: false,
            raw_payload: Some(payload.to_raw()),
        }
    }

    /// Flat view used by the policy matcher and sequence tracker.
    ///
    /// Copies the top-level fields plus selected raw-payload keys so
    /// conditions can address them by dotted path. Unresolved paths are a
    /// miss, not an error.
    pub fn to_match_data(&self) -> Value {
        let raw = self.raw_payload.clone().unwrap_or_default();
        let get_raw = |key: &str| raw.get(key).cloned().unwrap_or(Value::Null);
        let session_cwd = raw
            .get("session_cwd")
            .or_else(|| raw.get("cwd"))
            .cloned()
            .unwrap_or(Value::Null);

        serde_json::json!({
            "id": self.id.to_string(),
            "session_id": self.session_id,
            "hook_type": self.hook_type,
            "tool_name": self.tool_name,
            "tool_input": self.tool_input.clone().unwrap_or_default(),
            "tool_result": self.tool_result.clone().unwrap_or_default(),
            "category": self.category.as_str(),
            "severity": self.severity.as_str(),
            "file_paths": self.file_paths,
            "commands": self.commands,
            "urls": self.urls,
            "ip_addresses": self.ip_addresses,
            "permission_mode": get_raw("permission_mode"),
            "query": get_raw("query"),
            "transcript_path": get_raw("transcript_path"),
            "session_cwd": session_cwd,
            "parent_session_id": get_raw("parent_session_id"),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pre-tool decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decision for a PreToolUse hook: allow, block, or allow with modified input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    pub reason: Option<String>,
    pub modified_input: Option<serde_json::Map<String, Value>>,
    pub alert_id: Option<Uuid>,
}

impl Decision {
    pub fn allow() -> Decision {
        Decision {
            allow: true,
            reason: None,
            modified_input: None,
            alert_id: None,
        }
    }

    pub fn deny(reason: impl Into<String>, alert_id: Option<Uuid>) -> Decision {
        Decision {
            allow: false,
            reason: Some(reason.into()),
            modified_input: None,
            alert_id,
        }
    }

    /// Convert to the hook-protocol response body.
    ///
    /// Allow with no modification is the empty object; allow with a modified
    /// input and deny both use the `hookSpecificOutput` envelope.
    pub fn to_hook_response(&self) -> Value {
        if self.allow {
            match &self.modified_input {
                Some(input) => serde_json::json!({
                    "hookSpecificOutput": {
                        "hookEventName": "PreToolUse",
                        "permissionDecision": "allow",
                        "updatedInput": input,
                    }
                }),
                None => serde_json::json!({}),
            }
        } else {
            serde_json::json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "deny",
                    "permissionDecisionReason": self
                        .reason
                        .clone()
                        .unwrap_or_else(|| "Blocked by AgentsLeak policy".to_string()),
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_lattice_orders_info_below_critical() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn payload_aliases_normalize() {
        let payload: HookPayload = serde_json::from_value(serde_json::json!({
            "session_id": "s1",
            "hook_event_name": "PreToolUse",
            "cwd": "/home/user/project",
            "tool_name": "Bash",
            "tool_input": {"command": "ls"},
            "tool_response": {"output": "ok"},
            "custom_field": 42,
        }))
        .unwrap();

        assert_eq!(payload.hook_type, "PreToolUse");
        assert_eq!(payload.session_cwd.as_deref(), Some("/home/user/project"));
        assert!(payload.tool_result.is_some());
        assert_eq!(payload.extra.get("custom_field"), Some(&Value::from(42)));
    }

    #[test]
    fn payload_without_hook_type_defaults_to_unknown() {
        let payload: HookPayload =
            serde_json::from_value(serde_json::json!({"session_id": "s1"})).unwrap();
        assert_eq!(payload.hook_type, "unknown");
    }

    #[test]
    fn allow_decision_is_empty_object() {
        assert_eq!(Decision::allow().to_hook_response(), serde_json::json!({}));
    }

    #[test]
    fn deny_decision_carries_reason() {
        let body = Decision::deny("Blocked by policy: P1", None).to_hook_response();
        assert_eq!(
            body["hookSpecificOutput"]["permissionDecision"],
            "deny"
        );
        assert_eq!(
            body["hookSpecificOutput"]["permissionDecisionReason"],
            "Blocked by policy: P1"
        );
    }

    #[test]
    fn match_data_exposes_raw_payload_fields() {
        let payload: HookPayload = serde_json::from_value(serde_json::json!({
            "session_id": "s1",
            "hook_event_name": "SessionStart",
            "permission_mode": "dangerously-skip-permissions",
            "cwd": "/tmp",
        }))
        .unwrap();
        let event = Event::from_payload(&payload);
        let data = event.to_match_data();
        assert_eq!(data["permission_mode"], "dangerously-skip-permissions");
        assert_eq!(data["session_cwd"], "/tmp");
    }
}
