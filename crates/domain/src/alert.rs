//! Alerts raised by policy matches and behavioral sequences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::event::{EventCategory, Severity};

/// Triage status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    New,
    Investigating,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::New => "new",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<AlertStatus> {
        match s {
            "new" => Some(AlertStatus::New),
            "investigating" => Some(AlertStatus::Investigating),
            "resolved" => Some(AlertStatus::Resolved),
            "dismissed" => Some(AlertStatus::Dismissed),
            _ => None,
        }
    }
}

/// One piece of evidence attached to an alert, referencing a concrete event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvidence {
    pub event_id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// An alert generated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: EventCategory,
    pub status: AlertStatus,
    pub assigned_to: Option<String>,
    pub policy_id: Option<Uuid>,
    pub event_ids: Vec<Uuid>,
    pub evidence: Vec<AlertEvidence>,
    pub action_taken: Option<String>,
    /// True iff this alert caused a pre-tool deny. Invariant: a blocked
    /// alert's `event_ids` contains the denied event.
    pub blocked: bool,
    pub tags: Vec<String>,
    pub metadata: serde_json::Map<String, Value>,
}

impl Alert {
    pub fn new(
        session_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        category: EventCategory,
    ) -> Alert {
        let now = Utc::now();
        Alert {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            title: title.into(),
            description: description.into(),
            severity,
            category,
            status: AlertStatus::New,
            assigned_to: None,
            policy_id: None,
            event_ids: Vec::new(),
            evidence: Vec::new(),
            action_taken: None,
            blocked: false,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn add_evidence(
        &mut self,
        event_id: Uuid,
        description: impl Into<String>,
        data: serde_json::Map<String, Value>,
        file_path: Option<String>,
        command: Option<String>,
        url: Option<String>,
    ) {
        self.evidence.push(AlertEvidence {
            event_id,
            timestamp: Utc::now(),
            description: description.into(),
            data,
            file_path,
            command,
            url,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_references_event() {
        let mut alert = Alert::new(
            "s1",
            "Blocked: rm -rf",
            "Dangerous command",
            Severity::High,
            EventCategory::CommandExec,
        );
        let event_id = Uuid::new_v4();
        alert.event_ids.push(event_id);
        alert.add_evidence(
            event_id,
            "Blocked by policy",
            serde_json::Map::new(),
            None,
            Some("rm -rf /tmp".to_string()),
            None,
        );

        assert_eq!(alert.evidence.len(), 1);
        assert_eq!(alert.evidence[0].event_id, event_id);
        assert_eq!(alert.status, AlertStatus::New);
    }
}
