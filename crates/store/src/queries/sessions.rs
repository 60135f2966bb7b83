//! Session persistence and lifecycle queries.

use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use al_domain::{Session, SessionStatus};

use crate::error::Result;
use crate::records::{Page, SessionFilter};
use crate::{fmt_ts, parse_ts, parse_ts_opt, parse_uuid, Store};

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: parse_uuid(&row.get::<_, String>("id")?),
        session_id: row.get("session_id")?,
        started_at: parse_ts(&row.get::<_, String>("started_at")?),
        ended_at: parse_ts_opt(row.get("ended_at")?),
        cwd: row.get("cwd")?,
        parent_session_id: row.get("parent_session_id")?,
        event_count: row.get("event_count")?,
        alert_count: row.get("alert_count")?,
        risk_score: row.get::<_, Option<i64>>("risk_score")?.unwrap_or(0),
        status: SessionStatus::parse(&row.get::<_, String>("status")?)
            .unwrap_or(SessionStatus::Active),
        endpoint_hostname: row.get("endpoint_hostname")?,
        endpoint_user: row.get("endpoint_user")?,
        session_source: row.get("session_source")?,
    })
}

impl Store {
    /// Upsert by external session id. On conflict only end time, counters,
    /// and status are updated — origin fields (hostname, user, source) and
    /// start time are never rewritten by a later hook.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO sessions (
                    id, session_id, started_at, ended_at, cwd,
                    parent_session_id, event_count, alert_count, risk_score,
                    status, endpoint_hostname, endpoint_user, session_source
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT(session_id) DO UPDATE SET
                    ended_at = excluded.ended_at,
                    event_count = excluded.event_count,
                    alert_count = excluded.alert_count,
                    status = excluded.status
                "#,
                params![
                    session.id.to_string(),
                    session.session_id,
                    fmt_ts(&session.started_at),
                    session.ended_at.as_ref().map(fmt_ts),
                    session.cwd,
                    session.parent_session_id,
                    session.event_count,
                    session.alert_count,
                    session.risk_score,
                    session.status.as_str(),
                    session.endpoint_hostname,
                    session.endpoint_user,
                    session.session_source,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM sessions WHERE session_id = ?1",
                [session_id],
                row_to_session,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Bump the event counter. Activity also reactivates an ended session,
    /// so late hooks from a resumed agent reopen it.
    pub fn increment_session_event_count(&self, session_id: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE sessions SET event_count = event_count + 1, \
                 status = 'active', ended_at = NULL WHERE session_id = ?1",
                [session_id],
            )?;
            Ok(())
        })
    }

    pub fn increment_session_alert_count(&self, session_id: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE sessions SET alert_count = alert_count + 1 WHERE session_id = ?1",
                [session_id],
            )?;
            Ok(())
        })
    }

    pub fn increment_session_risk_score(&self, session_id: &str, delta: i64) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE sessions SET risk_score = risk_score + ?1 WHERE session_id = ?2",
                params![delta, session_id],
            )?;
            Ok(())
        })
    }

    /// Mark a session as ended.
    pub fn end_session(&self, session_id: &str) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE sessions SET ended_at = ?1, status = 'ended' WHERE session_id = ?2",
                params![fmt_ts(&Utc::now()), session_id],
            )?;
            Ok(())
        })
    }

    /// Mark active sessions as ended when their latest event (or, for
    /// event-less sessions, their start time) is older than the threshold.
    /// Returns the number of sessions closed.
    pub fn cleanup_stale_sessions(&self, inactive_minutes: i64) -> Result<usize> {
        let now = fmt_ts(&Utc::now());
        let cutoff = fmt_ts(&(Utc::now() - Duration::minutes(inactive_minutes)));

        self.with_tx(|tx| {
            let closed = tx.execute(
                r#"
                UPDATE sessions SET ended_at = ?1, status = 'ended'
                WHERE status = 'active'
                AND session_id IN (
                    SELECT s.session_id FROM sessions s
                    LEFT JOIN (
                        SELECT session_id, MAX(timestamp) AS last_event
                        FROM events GROUP BY session_id
                    ) e ON s.session_id = e.session_id
                    WHERE s.status = 'active'
                    AND (
                        (e.last_event IS NOT NULL AND e.last_event < ?2)
                        OR (e.last_event IS NULL AND s.started_at < ?2)
                    )
                )
                "#,
                params![now, cutoff],
            )?;
            Ok(closed)
        })
    }

    pub fn get_sessions_paginated(
        &self,
        page: i64,
        page_size: i64,
        filter: &SessionFilter,
    ) -> Result<Page<Session>> {
        let mut where_clause = String::from("FROM sessions WHERE 1=1");
        let mut params_vec: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            where_clause.push_str(" AND status = ?");
            params_vec.push(status.clone());
        }
        if let Some(hostname) = &filter.hostname {
            where_clause.push_str(" AND endpoint_hostname = ?");
            params_vec.push(hostname.clone());
        }
        if let Some(username) = &filter.username {
            where_clause.push_str(" AND endpoint_user = ?");
            params_vec.push(username.clone());
        }
        if let Some(source) = &filter.session_source {
            where_clause.push_str(" AND session_source = ?");
            params_vec.push(source.clone());
        }
        if let Some(from) = &filter.from_date {
            where_clause.push_str(" AND started_at >= ?");
            params_vec.push(fmt_ts(from));
        }
        if let Some(to) = &filter.to_date {
            where_clause.push_str(" AND started_at <= ?");
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
                "SELECT * {where_clause} ORDER BY started_at DESC LIMIT {page_size} OFFSET {offset}"
            ))?;
            let items = stmt
                .query_map(rusqlite::params_from_iter(&params_vec), row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(Page { items, total })
        })
    }

    pub fn get_session_count(&self, status: Option<&str>) -> Result<i64> {
        self.with_conn(|conn| {
            let count = match status {
                Some(status) => conn.query_row(
                    "SELECT COUNT(*) FROM sessions WHERE status = ?1",
                    [status],
                    |row| row.get(0),
                )?,
                None => {
                    conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?
                }
            };
            Ok(count)
        })
    }

    /// All session ids reported by a given endpoint hostname.
    pub fn session_ids_for_endpoint(&self, endpoint: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT session_id FROM sessions WHERE endpoint_hostname = ?1")?;
            let ids = stmt
                .query_map([endpoint], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }

    /// All session ids tagged with a given session source.
    pub fn session_ids_for_source(&self, source: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id FROM sessions \
                 WHERE COALESCE(session_source, 'claude_code') = ?1",
            )?;
            let ids = stmt
                .query_map([source], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
    }
}
