//! Aggregation queries backing the dashboard: overview stats, timelines,
//! top files/commands/domains, and per-endpoint rollups.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Timelike, Utc};
use rusqlite::Connection;

use al_domain::{graph::url_hostname, EventCategory, Severity};

use crate::error::Result;
use crate::records::{
    zero_category_map, zero_severity_map, AlertSummary, DashboardStats, EndpointStats,
    EventSummary, SessionStats, TimelinePoint, TimelineStats, TopCommand, TopDomain, TopFile,
};
use crate::{fmt_ts, parse_ts, parse_uuid, Store};

/// Timeline responses never exceed this many buckets; the interval is
/// upgraded (minute → hour → day) and finally hard-cut to stay under it.
pub const MAX_TIMELINE_BUCKETS: usize = 500;

impl Store {
    /// Event-by-category, event-by-severity, and alert-by-severity counts
    /// plus the first/last event timestamps for one session.
    pub fn get_session_stats(&self, session_id: &str) -> Result<SessionStats> {
        self.with_conn(|conn| {
            let events_by_category = grouped_counts(
                conn,
                "SELECT category, COUNT(*) FROM events WHERE session_id = ?1 GROUP BY category",
                session_id,
            )?;
            let events_by_severity = grouped_counts(
                conn,
                "SELECT severity, COUNT(*) FROM events WHERE session_id = ?1 GROUP BY severity",
                session_id,
            )?;
            let alerts_by_severity = grouped_counts(
                conn,
                "SELECT severity, COUNT(*) FROM alerts WHERE session_id = ?1 GROUP BY severity",
                session_id,
            )?;

            let (first, last): (Option<String>, Option<String>) = conn.query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM events WHERE session_id = ?1",
                [session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            Ok(SessionStats {
                events_by_category,
                events_by_severity,
                alerts_by_severity,
                first_event_at: first.map(|s| parse_ts(&s)),
                last_event_at: last.map(|s| parse_ts(&s)),
            })
        })
    }

    /// Full dashboard payload, optionally restricted to a time range and an
    /// endpoint hostname. An endpoint with no sessions yields all zeros.
    pub fn get_dashboard_stats(
        &self,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
        endpoint: Option<&str>,
    ) -> Result<DashboardStats> {
        // Resolve the endpoint's session set before building clauses.
        let endpoint_sessions: Option<Vec<String>> = match endpoint {
            Some(endpoint) => {
                let ids = self.session_ids_for_endpoint(endpoint)?;
                if ids.is_empty() {
                    return Ok(DashboardStats::empty());
                }
                Some(ids)
            }
            None => None,
        };

        let mut ev_clause = String::new();
        let mut al_clause = String::new();
        let mut ev_params: Vec<String> = Vec::new();
        let mut al_params: Vec<String> = Vec::new();
        if let Some(from) = from_date {
            ev_clause.push_str(" AND timestamp >= ?");
            ev_params.push(fmt_ts(from));
            al_clause.push_str(" AND created_at >= ?");
            al_params.push(fmt_ts(from));
        }
        if let Some(to) = to_date {
            ev_clause.push_str(" AND timestamp <= ?");
            ev_params.push(fmt_ts(to));
            al_clause.push_str(" AND created_at <= ?");
            al_params.push(fmt_ts(to));
        }
        if let Some(ids) = &endpoint_sessions {
            let placeholders = vec!["?"; ids.len()].join(",");
            let clause = format!(" AND session_id IN ({placeholders})");
            ev_clause.push_str(&clause);
            al_clause.push_str(&clause);
            ev_params.extend(ids.iter().cloned());
            al_params.extend(ids.iter().cloned());
        }

        let mut sess_clause = String::from("WHERE 1=1");
        let mut sess_params: Vec<String> = Vec::new();
        if let Some(from) = from_date {
            sess_clause.push_str(" AND started_at >= ?");
            sess_params.push(fmt_ts(from));
        }
        if let Some(to) = to_date {
            sess_clause.push_str(" AND started_at <= ?");
            sess_params.push(fmt_ts(to));
        }
        if let Some(endpoint) = endpoint {
            sess_clause.push_str(" AND endpoint_hostname = ?");
            sess_params.push(endpoint.to_string());
        }

        self.with_conn(|conn| {
            let count =
                |query: &str, params: &[String]| -> rusqlite::Result<i64> {
                    conn.query_row(query, rusqlite::params_from_iter(params), |row| row.get(0))
                };

            let total_sessions =
                count(&format!("SELECT COUNT(*) FROM sessions {sess_clause}"), &sess_params)?;
            let active_sessions = count(
                &format!("SELECT COUNT(*) FROM sessions {sess_clause} AND status = 'active'"),
                &sess_params,
            )?;
            let total_events = count(
                &format!("SELECT COUNT(*) FROM events WHERE 1=1{ev_clause}"),
                &ev_params,
            )?;
            let total_alerts = count(
                &format!("SELECT COUNT(*) FROM alerts WHERE 1=1{al_clause}"),
                &al_params,
            )?;
            let new_alerts = count(
                &format!("SELECT COUNT(*) FROM alerts WHERE status = 'new'{al_clause}"),
                &al_params,
            )?;
            let blocked_actions = count(
                &format!("SELECT COUNT(*) FROM alerts WHERE blocked = 1{al_clause}"),
                &al_params,
            )?;

            // Severity/category breakdowns over zero-filled maps so every
            // key is present in the payload.
            let mut alerts_by_severity = zero_severity_map();
            fill_grouped(
                conn,
                &format!(
                    "SELECT severity, COUNT(*) FROM alerts WHERE 1=1{al_clause} GROUP BY severity"
                ),
                &al_params,
                &mut alerts_by_severity,
            )?;

            let mut events_by_category = zero_category_map();
            fill_grouped(
                conn,
                &format!(
                    "SELECT category, COUNT(*) FROM events WHERE 1=1{ev_clause} GROUP BY category"
                ),
                &ev_params,
                &mut events_by_category,
            )?;

            // Ten most recent alerts and events within the range.
            let mut stmt = conn.prepare(&format!(
                "SELECT id, title, severity, status, session_id, created_at \
                 FROM alerts WHERE 1=1{al_clause} ORDER BY created_at DESC LIMIT 10"
            ))?;
            let recent_alerts = stmt
                .query_map(rusqlite::params_from_iter(&al_params), |row| {
                    Ok(AlertSummary {
                        id: parse_uuid(&row.get::<_, String>(0)?),
                        title: row.get(1)?,
                        severity: Severity::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(Severity::Medium),
                        status: row.get(3)?,
                        session_id: row.get(4)?,
                        created_at: parse_ts(&row.get::<_, String>(5)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(&format!(
                "SELECT id, tool_name, category, severity, session_id, timestamp \
                 FROM events WHERE 1=1{ev_clause} ORDER BY timestamp DESC LIMIT 10"
            ))?;
            let recent_events = stmt
                .query_map(rusqlite::params_from_iter(&ev_params), |row| {
                    Ok(EventSummary {
                        id: parse_uuid(&row.get::<_, String>(0)?),
                        tool_name: row.get(1)?,
                        category: EventCategory::parse(&row.get::<_, String>(2)?)
                            .unwrap_or(EventCategory::Unknown),
                        severity: Severity::parse(&row.get::<_, String>(3)?)
                            .unwrap_or(Severity::Info),
                        session_id: row.get(4)?,
                        timestamp: parse_ts(&row.get::<_, String>(5)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut sessions_by_source = BTreeMap::new();
            let mut stmt = conn.prepare(&format!(
                "SELECT COALESCE(session_source, 'claude_code') AS src, COUNT(*) \
                 FROM sessions {sess_clause} GROUP BY src"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(&sess_params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (source, count) = row?;
                sessions_by_source.insert(source, count);
            }

            Ok(DashboardStats {
                total_sessions,
                active_sessions,
                total_events,
                total_alerts,
                new_alerts,
                blocked_actions,
                alerts_by_severity,
                events_by_category,
                recent_alerts,
                recent_events,
                sessions_by_source,
            })
        })
    }

    /// Events and alerts grouped into time buckets. The interval is
    /// auto-upgraded (minute → hour → day) so the response never exceeds
    /// [`MAX_TIMELINE_BUCKETS`]; missing buckets are zero-filled.
    pub fn get_timeline_stats(
        &self,
        from_date: &DateTime<Utc>,
        to_date: &DateTime<Utc>,
        interval: &str,
        session_id: Option<&str>,
        endpoint: Option<&str>,
    ) -> Result<TimelineStats> {
        let range_seconds = (*to_date - *from_date).num_seconds().max(0) as f64;
        let mut interval = match interval {
            "minute" | "hour" | "day" => interval.to_string(),
            _ => "hour".to_string(),
        };
        let mut estimated = range_seconds / interval_seconds(&interval);
        if estimated > MAX_TIMELINE_BUCKETS as f64 {
            if interval == "minute" {
                interval = "hour".to_string();
                estimated = range_seconds / 3600.0;
            }
            if estimated > MAX_TIMELINE_BUCKETS as f64 {
                interval = "day".to_string();
            }
        }

        let mut extra_clause = String::new();
        let mut extra_params: Vec<String> = Vec::new();
        if let Some(session_id) = session_id {
            extra_clause.push_str(" AND session_id = ?");
            extra_params.push(session_id.to_string());
        } else if let Some(endpoint) = endpoint {
            let ids = self.session_ids_for_endpoint(endpoint)?;
            if ids.is_empty() {
                return Ok(TimelineStats {
                    points: Vec::new(),
                    total_events: 0,
                    total_alerts: 0,
                    interval,
                });
            }
            let placeholders = vec!["?"; ids.len()].join(",");
            extra_clause.push_str(&format!(" AND session_id IN ({placeholders})"));
            extra_params.extend(ids);
        }

        let time_format = bucket_sql_format(&interval);

        self.with_conn(|conn| {
            let mut params: Vec<String> = vec![fmt_ts(from_date), fmt_ts(to_date)];
            params.extend(extra_params.iter().cloned());

            let mut total_events = 0;
            let mut events_by_bucket: HashMap<String, i64> = HashMap::new();
            let mut stmt = conn.prepare(&format!(
                "SELECT strftime('{time_format}', timestamp) AS bucket, COUNT(*) \
                 FROM events WHERE timestamp >= ? AND timestamp <= ?{extra_clause} \
                 GROUP BY bucket"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(&params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (bucket, count) = row?;
                total_events += count;
                events_by_bucket.insert(bucket, count);
            }

            let mut total_alerts = 0;
            let mut alerts_by_bucket: HashMap<String, i64> = HashMap::new();
            let mut stmt = conn.prepare(&format!(
                "SELECT strftime('{time_format}', created_at) AS bucket, COUNT(*) \
                 FROM alerts WHERE created_at >= ? AND created_at <= ?{extra_clause} \
                 GROUP BY bucket"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(&params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (bucket, count) = row?;
                total_alerts += count;
                alerts_by_bucket.insert(bucket, count);
            }

            // Zero-fill the whole range, hard-capped as a safety net.
            let step = match interval.as_str() {
                "minute" => Duration::minutes(1),
                "day" => Duration::days(1),
                _ => Duration::hours(1),
            };
            let mut current = truncate_to_bucket(from_date, &interval);
            let mut points = Vec::new();
            while current <= *to_date {
                let key = current.format(bucket_chrono_format(&interval)).to_string();
                points.push(TimelinePoint {
                    timestamp: current,
                    events: events_by_bucket.get(&key).copied().unwrap_or(0),
                    alerts: alerts_by_bucket.get(&key).copied().unwrap_or(0),
                });
                current += step;
                if points.len() >= MAX_TIMELINE_BUCKETS {
                    break;
                }
            }

            Ok(TimelineStats {
                points,
                total_events,
                total_alerts,
                interval: interval.clone(),
            })
        })
    }

    /// Most accessed files, aggregated in memory from the events table's
    /// extracted path lists.
    pub fn get_top_files(
        &self,
        limit: usize,
        sort_by: &str,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
        endpoint: Option<&str>,
    ) -> Result<Vec<TopFile>> {
        let (clause, params) = match self.scan_clause(from_date, to_date, endpoint)? {
            Some(parts) => parts,
            None => return Ok(Vec::new()),
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT file_paths, category, timestamp FROM events \
                 WHERE category IN ('file_read', 'file_write', 'file_delete') \
                 AND file_paths IS NOT NULL AND file_paths != '[]'{clause}"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(&params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut stats: HashMap<String, TopFile> = HashMap::new();
            for row in rows {
                let (paths_json, category, ts) = row?;
                let Ok(paths) = serde_json::from_str::<Vec<String>>(&paths_json) else {
                    continue;
                };
                let ts = parse_ts(&ts);
                for path in paths.into_iter().filter(|p| !p.is_empty()) {
                    let entry = stats.entry(path.clone()).or_insert_with(|| TopFile {
                        file_path: path,
                        read_count: 0,
                        write_count: 0,
                        delete_count: 0,
                        total_access: 0,
                        last_accessed: None,
                        alert_count: 0,
                    });
                    match category.as_str() {
                        "file_read" => entry.read_count += 1,
                        "file_write" => entry.write_count += 1,
                        "file_delete" => entry.delete_count += 1,
                        _ => {}
                    }
                    if entry.last_accessed.map_or(true, |last| ts > last) {
                        entry.last_accessed = Some(ts);
                    }
                }
            }

            let mut results: Vec<TopFile> = stats.into_values().collect();
            for entry in &mut results {
                entry.total_access = entry.read_count + entry.write_count + entry.delete_count;
            }
            results.sort_by_key(|f| {
                std::cmp::Reverse(match sort_by {
                    "read_count" => f.read_count,
                    "write_count" => f.write_count,
                    "alert_count" => f.alert_count,
                    _ => f.total_access,
                })
            });
            results.truncate(limit);
            Ok(results)
        })
    }

    /// Most executed commands, grouped by first token.
    pub fn get_top_commands(
        &self,
        limit: usize,
        sort_by: &str,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
        endpoint: Option<&str>,
    ) -> Result<Vec<TopCommand>> {
        let (clause, params) = match self.scan_clause(from_date, to_date, endpoint)? {
            Some(parts) => parts,
            None => return Ok(Vec::new()),
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT commands, timestamp FROM events \
                 WHERE category = 'command_exec' \
                 AND commands IS NOT NULL AND commands != '[]'{clause}"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(&params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut stats: HashMap<String, TopCommand> = HashMap::new();
            for row in rows {
                let (commands_json, ts) = row?;
                let Ok(commands) = serde_json::from_str::<Vec<String>>(&commands_json) else {
                    continue;
                };
                let ts = parse_ts(&ts);
                for command in commands.into_iter().filter(|c| !c.is_empty()) {
                    let short = command
                        .split_whitespace()
                        .next()
                        .unwrap_or(&command)
                        .to_string();
                    let entry = stats.entry(short.clone()).or_insert_with(|| TopCommand {
                        command: short,
                        execution_count: 0,
                        last_executed: None,
                        alert_count: 0,
                    });
                    entry.execution_count += 1;
                    if entry.last_executed.map_or(true, |last| ts > last) {
                        entry.last_executed = Some(ts);
                    }
                }
            }

            let mut results: Vec<TopCommand> = stats.into_values().collect();
            results.sort_by_key(|c| {
                std::cmp::Reverse(match sort_by {
                    "alert_count" => c.alert_count,
                    _ => c.execution_count,
                })
            });
            results.truncate(limit);
            Ok(results)
        })
    }

    /// Most contacted domains, keyed by URL hostname.
    pub fn get_top_domains(
        &self,
        limit: usize,
        sort_by: &str,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
        endpoint: Option<&str>,
    ) -> Result<Vec<TopDomain>> {
        let (clause, params) = match self.scan_clause(from_date, to_date, endpoint)? {
            Some(parts) => parts,
            None => return Ok(Vec::new()),
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT urls, timestamp FROM events \
                 WHERE category = 'network_access' \
                 AND urls IS NOT NULL AND urls != '[]'{clause}"
            ))?;
            let rows = stmt.query_map(rusqlite::params_from_iter(&params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut stats: HashMap<String, TopDomain> = HashMap::new();
            for row in rows {
                let (urls_json, ts) = row?;
                let Ok(urls) = serde_json::from_str::<Vec<String>>(&urls_json) else {
                    continue;
                };
                let ts = parse_ts(&ts);
                for url in urls.into_iter().filter(|u| !u.is_empty()) {
                    let hostname = url_hostname(&url);
                    let entry = stats.entry(hostname.clone()).or_insert_with(|| TopDomain {
                        hostname,
                        access_count: 0,
                        last_accessed: None,
                        alert_count: 0,
                    });
                    entry.access_count += 1;
                    if entry.last_accessed.map_or(true, |last| ts > last) {
                        entry.last_accessed = Some(ts);
                    }
                }
            }

            let mut results: Vec<TopDomain> = stats.into_values().collect();
            results.sort_by_key(|d| {
                std::cmp::Reverse(match sort_by {
                    "alert_count" => d.alert_count,
                    _ => d.access_count,
                })
            });
            results.truncate(limit);
            Ok(results)
        })
    }

    /// Aggregated statistics grouped by endpoint (hostname, user, source).
    pub fn get_endpoint_stats(&self) -> Result<Vec<EndpointStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT endpoint_hostname, endpoint_user, COUNT(*), \
                 SUM(event_count), SUM(alert_count), session_source \
                 FROM sessions \
                 GROUP BY endpoint_hostname, endpoint_user, session_source",
            )?;
            let results = stmt
                .query_map([], |row| {
                    Ok(EndpointStats {
                        endpoint_hostname: row.get(0)?,
                        endpoint_user: row.get(1)?,
                        session_count: row.get(2)?,
                        total_events: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        total_alerts: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                        session_source: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(results)
        })
    }

    /// Number of distinct (hostname, user) endpoint pairs.
    pub fn get_unique_endpoint_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM ( \
                 SELECT DISTINCT endpoint_hostname, endpoint_user FROM sessions \
                 WHERE endpoint_hostname IS NOT NULL)",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }

    /// Shared date/endpoint filter for the top-N scans. Returns `None` when
    /// the endpoint filter matches no sessions (empty result, not an error).
    fn scan_clause(
        &self,
        from_date: Option<&DateTime<Utc>>,
        to_date: Option<&DateTime<Utc>>,
        endpoint: Option<&str>,
    ) -> Result<Option<(String, Vec<String>)>> {
        let mut clause = String::new();
        let mut params: Vec<String> = Vec::new();
        if let Some(from) = from_date {
            clause.push_str(" AND timestamp >= ?");
            params.push(fmt_ts(from));
        }
        if let Some(to) = to_date {
            clause.push_str(" AND timestamp <= ?");
            params.push(fmt_ts(to));
        }
        if let Some(endpoint) = endpoint {
            let ids = self.session_ids_for_endpoint(endpoint)?;
            if ids.is_empty() {
                return Ok(None);
            }
            let placeholders = vec!["?"; ids.len()].join(",");
            clause.push_str(&format!(" AND session_id IN ({placeholders})"));
            params.extend(ids);
        }
        Ok(Some((clause, params)))
    }
}

fn grouped_counts(
    conn: &Connection,
    query: &str,
    param: &str,
) -> rusqlite::Result<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare(query)?;
    let rows = stmt.query_map([param], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut map = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        map.insert(key, count);
    }
    Ok(map)
}

fn fill_grouped(
    conn: &Connection,
    query: &str,
    params: &[String],
    target: &mut BTreeMap<String, i64>,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(query)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (key, count) = row?;
        if let Some(slot) = target.get_mut(&key) {
            *slot = count;
        }
    }
    Ok(())
}

fn interval_seconds(interval: &str) -> f64 {
    match interval {
        "minute" => 60.0,
        "day" => 86_400.0,
        _ => 3_600.0,
    }
}

fn bucket_sql_format(interval: &str) -> &'static str {
    match interval {
        "minute" => "%Y-%m-%d %H:%M:00",
        "day" => "%Y-%m-%d 00:00:00",
        _ => "%Y-%m-%d %H:00:00",
    }
}

fn bucket_chrono_format(interval: &str) -> &'static str {
    match interval {
        "minute" => "%Y-%m-%d %H:%M:00",
        "day" => "%Y-%m-%d 00:00:00",
        _ => "%Y-%m-%d %H:00:00",
    }
}

fn truncate_to_bucket(ts: &DateTime<Utc>, interval: &str) -> DateTime<Utc> {
    let truncated = ts.with_second(0).and_then(|t| t.with_nanosecond(0));
    let truncated = match interval {
        "minute" => truncated,
        "day" => truncated
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_hour(0)),
        _ => truncated.and_then(|t| t.with_minute(0)),
    };
    truncated.unwrap_or(*ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use al_domain::{Alert, Event, HookPayload, Session};

    fn store_with_session(session_id: &str) -> Store {
        let store = Store::open_in_memory().unwrap();
        let mut session = Session::new(session_id);
        session.endpoint_hostname = Some("devbox-1".to_string());
        store.save_session(&session).unwrap();
        store
    }

    fn event_at(session_id: &str, ts: DateTime<Utc>, category: EventCategory) -> Event {
        let payload: HookPayload = serde_json::from_value(serde_json::json!({
            "session_id": session_id,
            "hook_event_name": "PostToolUse",
            "tool_name": "Bash",
        }))
        .unwrap();
        let mut event = Event::from_payload(&payload);
        event.timestamp = ts;
        event.category = category;
        event
    }

    #[test]
    fn timeline_caps_buckets_and_upgrades_interval() {
        let store = store_with_session("s1");
        let to = Utc::now();
        let from = to - Duration::days(30);

        let stats = store
            .get_timeline_stats(&from, &to, "minute", None, None)
            .unwrap();
        assert!(stats.points.len() <= MAX_TIMELINE_BUCKETS);
        assert!(stats.interval == "hour" || stats.interval == "day");
    }

    #[test]
    fn timeline_zero_fills_and_counts() {
        let store = store_with_session("s1");
        let base = Utc::now() - Duration::hours(2);
        let mut ev = event_at("s1", base, EventCategory::CommandExec);
        ev.commands = vec!["ls".to_string()];
        store.save_event(&ev).unwrap();

        let from = base - Duration::hours(1);
        let to = base + Duration::hours(1);
        let stats = store
            .get_timeline_stats(&from, &to, "hour", None, None)
            .unwrap();
        assert_eq!(stats.interval, "hour");
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.points.iter().map(|p| p.events).sum::<i64>(), 1);
        assert!(stats.points.len() >= 2);
    }

    #[test]
    fn timeline_unknown_endpoint_is_empty() {
        let store = store_with_session("s1");
        let to = Utc::now();
        let from = to - Duration::hours(1);
        let stats = store
            .get_timeline_stats(&from, &to, "hour", None, Some("ghost-host"))
            .unwrap();
        assert!(stats.points.is_empty());
        assert_eq!(stats.total_events, 0);
    }

    #[test]
    fn dashboard_unknown_endpoint_returns_zeros() {
        let store = store_with_session("s1");
        store
            .save_event(&event_at("s1", Utc::now(), EventCategory::CommandExec))
            .unwrap();

        let stats = store
            .get_dashboard_stats(None, None, Some("ghost-host"))
            .unwrap();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.alerts_by_severity.len(), 5);
        assert_eq!(stats.events_by_category.len(), 10);
        assert!(stats.recent_events.is_empty());
    }

    #[test]
    fn dashboard_counts_by_endpoint() {
        let store = store_with_session("s1");
        store
            .save_event(&event_at("s1", Utc::now(), EventCategory::FileRead))
            .unwrap();
        let mut alert = Alert::new(
            "s1",
            "t",
            "",
            Severity::High,
            EventCategory::CommandExec,
        );
        alert.blocked = true;
        store.save_alert(&alert).unwrap();

        let stats = store
            .get_dashboard_stats(None, None, Some("devbox-1"))
            .unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.blocked_actions, 1);
        assert_eq!(stats.events_by_category["file_read"], 1);
        assert_eq!(stats.alerts_by_severity["high"], 1);
        assert_eq!(stats.sessions_by_source["claude_code"], 1);
    }

    #[test]
    fn top_files_aggregates_by_path() {
        let store = store_with_session("s1");
        for _ in 0..3 {
            let mut ev = event_at("s1", Utc::now(), EventCategory::FileRead);
            ev.file_paths = vec!["/app/.env".to_string()];
            store.save_event(&ev).unwrap();
        }
        let mut ev = event_at("s1", Utc::now(), EventCategory::FileWrite);
        ev.file_paths = vec!["/app/.env".to_string(), "/tmp/out".to_string()];
        store.save_event(&ev).unwrap();

        let top = store.get_top_files(10, "total_access", None, None, None).unwrap();
        assert_eq!(top[0].file_path, "/app/.env");
        assert_eq!(top[0].read_count, 3);
        assert_eq!(top[0].write_count, 1);
        assert_eq!(top[0].total_access, 4);
    }

    #[test]
    fn top_commands_group_by_first_token() {
        let store = store_with_session("s1");
        for command in ["curl -o /tmp/a https://x.com", "curl https://y.com", "ls -la"] {
            let mut ev = event_at("s1", Utc::now(), EventCategory::CommandExec);
            ev.commands = vec![command.to_string()];
            store.save_event(&ev).unwrap();
        }

        let top = store
            .get_top_commands(10, "execution_count", None, None, None)
            .unwrap();
        assert_eq!(top[0].command, "curl");
        assert_eq!(top[0].execution_count, 2);
    }

    #[test]
    fn top_domains_key_on_hostname() {
        let store = store_with_session("s1");
        for url in ["https://evil.com/a", "https://evil.com/b", "http://ok.org"] {
            let mut ev = event_at("s1", Utc::now(), EventCategory::NetworkAccess);
            ev.urls = vec![url.to_string()];
            store.save_event(&ev).unwrap();
        }

        let top = store
            .get_top_domains(10, "access_count", None, None, None)
            .unwrap();
        assert_eq!(top[0].hostname, "evil.com");
        assert_eq!(top[0].access_count, 2);
    }

    #[test]
    fn session_stats_include_time_range() {
        let store = store_with_session("s1");
        let base = Utc::now();
        store
            .save_event(&event_at("s1", base, EventCategory::FileRead))
            .unwrap();
        store
            .save_event(&event_at(
                "s1",
                base + Duration::seconds(5),
                EventCategory::CommandExec,
            ))
            .unwrap();

        let stats = store.get_session_stats("s1").unwrap();
        assert_eq!(stats.events_by_category["file_read"], 1);
        assert_eq!(stats.events_by_category["command_exec"], 1);
        assert!(stats.first_event_at.unwrap() <= stats.last_event_at.unwrap());
    }
}
