//! Event persistence and read queries.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use al_domain::{Event, EventCategory, Severity};

use crate::error::Result;
use crate::records::{EventFilter, Page};
use crate::{fmt_ts, from_json, parse_ts, parse_uuid, to_json, Store};

pub(crate) fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: parse_uuid(&row.get::<_, String>("id")?),
        session_id: row.get("session_id")?,
        timestamp: parse_ts(&row.get::<_, String>("timestamp")?),
        hook_type: row.get("hook_type")?,
        tool_name: row.get("tool_name")?,
        tool_input: from_json(row.get("tool_input")?),
        tool_result: from_json(row.get("tool_result")?),
        category: EventCategory::parse(&row.get::<_, String>("category")?)
            .unwrap_or(EventCategory::Unknown),
        severity: Severity::parse(&row.get::<_, String>("severity")?)
            .unwrap_or(Severity::Info),
        file_paths: from_json(row.get("file_paths")?),
        commands: from_json(row.get("commands")?),
        urls: from_json(row.get("urls")?),
        ip_addresses: from_json(row.get("ip_addresses")?),
        processed: row.get::<_, i64>("processed")? != 0,
        enriched: row.get::<_, i64>("enriched")? != 0,
        raw_payload: from_json(row.get("raw_payload")?),
    })
}

impl Store {
    /// Insert-or-replace on event id. Events are never partially merged:
    /// a re-save (e.g. after async processing) replaces the whole row.
    pub fn save_event(&self, event: &Event) -> Result<()> {
        let tool_input = event.tool_input.as_ref().map(to_json).transpose()?;
        let tool_result = event.tool_result.as_ref().map(to_json).transpose()?;
        let raw_payload = event.raw_payload.as_ref().map(to_json).transpose()?;
        self.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO events (
                    id, session_id, timestamp, hook_type, tool_name,
                    tool_input, tool_result, category, severity,
                    file_paths, commands, urls, ip_addresses,
                    processed, enriched, raw_payload
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
                params![
                    event.id.to_string(),
                    event.session_id,
                    fmt_ts(&event.timestamp),
                    event.hook_type,
                    event.tool_name,
                    tool_input,
                    tool_result,
                    event.category.as_str(),
                    event.severity.as_str(),
                    to_json(&event.file_paths)?,
                    to_json(&event.commands)?,
                    to_json(&event.urls)?,
                    to_json(&event.ip_addresses)?,
                    event.processed as i64,
                    event.enriched as i64,
                    raw_payload,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_event_by_id(&self, event_id: &Uuid) -> Result<Option<Event>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM events WHERE id = ?1",
                [event_id.to_string()],
                row_to_event,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn get_events_paginated(
        &self,
        page: i64,
        page_size: i64,
        filter: &EventFilter,
    ) -> Result<Page<Event>> {
        let mut where_clause = String::from("FROM events WHERE 1=1");
        let mut params_vec: Vec<String> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            where_clause.push_str(" AND session_id = ?");
            params_vec.push(session_id.clone());
        }
        if let Some(category) = &filter.category {
            where_clause.push_str(" AND category = ?");
            params_vec.push(category.clone());
        }
        if let Some(severity) = &filter.severity {
            where_clause.push_str(" AND severity = ?");
            params_vec.push(severity.clone());
        }
        if let Some(tool_name) = &filter.tool_name {
            where_clause.push_str(" AND tool_name = ?");
            params_vec.push(tool_name.clone());
        }
        if let Some(from) = &filter.from_date {
            where_clause.push_str(" AND timestamp >= ?");
            params_vec.push(fmt_ts(from));
        }
        if let Some(to) = &filter.to_date {
            where_clause.push_str(" AND timestamp <= ?");
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
                "SELECT * {where_clause} ORDER BY timestamp DESC LIMIT {page_size} OFFSET {offset}"
            ))?;
            let items = stmt
                .query_map(rusqlite::params_from_iter(&params_vec), row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page { items, total })
        })
    }

    /// The `limit` most recent events in a session at or before `before`,
    /// returned in chronological order (oldest first).
    pub fn get_events_before(
        &self,
        session_id: &str,
        before: &DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM events WHERE session_id = ?1 AND timestamp <= ?2 \
                 ORDER BY timestamp DESC LIMIT ?3",
            )?;
            let mut events = stmt
                .query_map(params![session_id, fmt_ts(before), limit], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            events.reverse();
            Ok(events)
        })
    }

    pub fn get_event_count(
        &self,
        session_id: Option<&str>,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
    ) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM events WHERE 1=1");
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(session_id) = session_id {
            query.push_str(" AND session_id = ?");
            params_vec.push(session_id.to_string());
        }
        if let Some(from) = from_date {
            query.push_str(" AND timestamp >= ?");
            params_vec.push(fmt_ts(from));
        }
        if let Some(to) = to_date {
            query.push_str(" AND timestamp <= ?");
            params_vec.push(fmt_ts(to));
        }
        self.with_conn(|conn| {
            conn.query_row(&query, rusqlite::params_from_iter(&params_vec), |row| {
                row.get(0)
            })
            .map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::{HookPayload, Session};

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.save_session(&Session::new("s1")).unwrap();
        store
    }

    fn event(session_id: &str, tool: &str) -> Event {
        let payload: HookPayload = serde_json::from_value(serde_json::json!({
            "session_id": session_id,
            "hook_event_name": "PostToolUse",
            "tool_name": tool,
            "tool_input": {"command": "ls"},
        }))
        .unwrap();
        Event::from_payload(&payload)
    }

    #[test]
    fn save_event_round_trips() {
        let store = seeded_store();
        let mut ev = event("s1", "Bash");
        ev.file_paths = vec!["/tmp/x".to_string()];
        ev.category = EventCategory::CommandExec;
        ev.severity = Severity::Low;
        store.save_event(&ev).unwrap();

        let stored = store.get_event_by_id(&ev.id).unwrap().unwrap();
        assert_eq!(stored.session_id, "s1");
        assert_eq!(stored.category, EventCategory::CommandExec);
        assert_eq!(stored.severity, Severity::Low);
        assert_eq!(stored.file_paths, vec!["/tmp/x"]);
        assert!(!stored.processed);
    }

    #[test]
    fn save_event_replaces_whole_row() {
        let store = seeded_store();
        let mut ev = event("s1", "Bash");
        store.save_event(&ev).unwrap();

        ev.processed = true;
        ev.enriched = true;
        store.save_event(&ev).unwrap();

        let stored = store.get_event_by_id(&ev.id).unwrap().unwrap();
        assert!(stored.processed);
        assert!(stored.enriched);
        let count = store.get_event_count(Some("s1"), None, None).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn events_before_returns_chronological_order() {
        let store = seeded_store();
        let base = Utc::now();
        for i in 0..5 {
            let mut ev = event("s1", "Bash");
            ev.timestamp = base + chrono::Duration::seconds(i);
            store.save_event(&ev).unwrap();
        }

        let cutoff = base + chrono::Duration::seconds(3);
        let events = store.get_events_before("s1", &cutoff, 3).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().all(|e| e.timestamp <= cutoff));
    }

    #[test]
    fn pagination_filters_by_tool_and_severity() {
        let store = seeded_store();
        for tool in ["Bash", "Read", "Bash"] {
            let mut ev = event("s1", tool);
            ev.severity = if tool == "Bash" {
                Severity::High
            } else {
                Severity::Info
            };
            store.save_event(&ev).unwrap();
        }

        let page = store
            .get_events_paginated(
                1,
                10,
                &EventFilter {
                    tool_name: Some("Bash".to_string()),
                    severity: Some("high".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|e| e.tool_name.as_deref() == Some("Bash")));
    }
}
