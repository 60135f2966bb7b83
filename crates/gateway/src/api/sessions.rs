//! Session read API and the terminate command.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use al_store::{EventFilter, SessionFilter};

use super::{ApiError, ApiResult};
use crate::state::AppState;

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub status: Option<String>,
    pub hostname: Option<String>,
    /// Alias for `hostname` used by older dashboard builds.
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub session_source: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = SessionFilter {
        status: query.status,
        hostname: query.hostname.or(query.endpoint),
        username: query.username,
        session_source: query.session_source,
        from_date: query.from_date,
        to_date: query.to_date,
    };
    let mut page = state
        .store
        .get_sessions_paginated(query.page, query.page_size.clamp(1, 500), &filter)?;

    // Stored counters can trail the tables (counter bumps and event saves
    // are separate writes), so the list reports the authoritative counts.
    let session_ids: Vec<String> = page.items.iter().map(|s| s.session_id.clone()).collect();
    let event_counts = state.store.get_event_counts_by_session(&session_ids)?;
    let alert_counts = state.store.get_alert_counts_by_session(&session_ids)?;
    for session in &mut page.items {
        if let Some(count) = event_counts.get(&session.session_id) {
            session.event_count = *count;
        }
        if let Some(count) = alert_counts.get(&session.session_id) {
            session.alert_count = *count;
        }
    }

    Ok(Json(serde_json::json!({
        "items": page.items,
        "total": page.total,
        "page": query.page,
        "page_size": query.page_size,
    })))
}

/// GET /api/sessions/:id — session detail with count breakdowns.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .store
        .get_session_by_id(&session_id)?
        .ok_or_else(|| ApiError::not_found(format!("session {session_id}")))?;
    let stats = state.store.get_session_stats(&session_id)?;

    Ok(Json(serde_json::json!({
        "session": session,
        "stats": stats,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SessionEventsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_events_page_size")]
    pub page_size: i64,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub tool_name: Option<String>,
}

fn default_events_page_size() -> i64 {
    50
}

/// GET /api/sessions/:id/events
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionEventsQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_session_by_id(&session_id)?.is_none() {
        return Err(ApiError::not_found(format!("session {session_id}")));
    }
    let filter = EventFilter {
        session_id: Some(session_id),
        category: query.category,
        severity: query.severity,
        tool_name: query.tool_name,
        ..Default::default()
    };
    let page = state
        .store
        .get_events_paginated(query.page, query.page_size.clamp(1, 500), &filter)?;

    Ok(Json(serde_json::json!({
        "items": page.items,
        "total": page.total,
        "page": query.page,
        "page_size": query.page_size,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SessionTimelineQuery {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    #[serde(default = "default_interval")]
    pub interval: String,
}

fn default_interval() -> String {
    "hour".to_string()
}

/// GET /api/sessions/:id/timeline — defaults to the last 24 hours.
pub async fn session_timeline(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionTimelineQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_session_by_id(&session_id)?.is_none() {
        return Err(ApiError::not_found(format!("session {session_id}")));
    }
    let to = query.to_date.unwrap_or_else(Utc::now);
    let from = query.from_date.unwrap_or(to - Duration::hours(24));
    let stats = state.store.get_timeline_stats(
        &from,
        &to,
        &query.interval,
        Some(&session_id),
        None,
    )?;
    Ok(Json(stats))
}

/// POST /api/sessions/:id/terminate — mark ended and clear the sequence
/// tracker's window and dedup state for the session.
pub async fn terminate_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_session_by_id(&session_id)?.is_none() {
        return Err(ApiError::not_found(format!("session {session_id}")));
    }
    state.store.end_session(&session_id)?;
    state.engine.reset_session(&session_id);

    if let Some(session) = state.store.get_session_by_id(&session_id)? {
        state.engine.broadcast_session_update(&session);
    }
    tracing::info!(session_id = %session_id, "session terminated");

    Ok(Json(serde_json::json!({
        "status": "terminated",
        "session_id": session_id,
    })))
}
