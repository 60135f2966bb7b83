//! Event read API.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use al_store::EventFilter;

use super::{ApiError, ApiResult};
use crate::state::AppState;

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub session_id: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub tool_name: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

/// GET /api/events
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = EventFilter {
        session_id: query.session_id,
        category: query.category,
        severity: query.severity,
        tool_name: query.tool_name,
        from_date: query.from_date,
        to_date: query.to_date,
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

/// GET /api/events/:id
pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let event = state
        .store
        .get_event_by_id(&event_id)?
        .ok_or_else(|| ApiError::not_found(format!("event {event_id}")))?;
    Ok(Json(event))
}
