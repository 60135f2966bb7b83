//! Alert read and triage API.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use al_domain::Alert;
use al_store::AlertFilter;

use super::{ApiError, ApiResult};
use crate::state::AppState;

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    pub session_id: Option<String>,
    pub status: Option<String>,
    pub severity: Option<String>,
    pub policy_id: Option<Uuid>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

/// GET /api/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = AlertFilter {
        session_id: query.session_id,
        status: query.status,
        severity: query.severity,
        policy_id: query.policy_id,
        from_date: query.from_date,
        to_date: query.to_date,
    };
    let page = state
        .store
        .get_alerts_paginated(query.page, query.page_size.clamp(1, 500), &filter)?;

    Ok(Json(serde_json::json!({
        "items": page.items,
        "total": page.total,
        "page": query.page,
        "page_size": query.page_size,
    })))
}

fn load_alert(state: &AppState, alert_id: &Uuid) -> ApiResult<Alert> {
    state
        .store
        .get_alert_by_id(alert_id)?
        .ok_or_else(|| ApiError::not_found(format!("alert {alert_id}")))
}

/// GET /api/alerts/:id
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(load_alert(&state, &alert_id)?))
}

/// PATCH /api/alerts/:id — allowlisted patch of triage fields (status,
/// assignee, action notes, tags, metadata).
pub async fn update_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let patch = body
        .as_object()
        .ok_or_else(|| ApiError::bad_request("patch body must be an object"))?;
    let updated = state.store.update_alert(&alert_id, patch)?;
    Ok(Json(updated))
}

/// POST /api/alerts/:id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut patch = serde_json::Map::new();
    patch.insert("status".to_string(), Value::from("investigating"));
    let updated = state.store.update_alert(&alert_id, &patch)?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize, Default)]
pub struct ResolveBody {
    pub action_taken: Option<String>,
}

/// POST /api/alerts/:id/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    body: Option<Json<ResolveBody>>,
) -> ApiResult<impl IntoResponse> {
    let mut patch = serde_json::Map::new();
    patch.insert("status".to_string(), Value::from("resolved"));
    if let Some(Json(body)) = body {
        if let Some(action) = body.action_taken {
            patch.insert("action_taken".to_string(), Value::from(action));
        }
    }
    let updated = state.store.update_alert(&alert_id, &patch)?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    #[serde(default = "default_context_limit")]
    pub limit: i64,
}

fn default_context_limit() -> i64 {
    20
}

/// GET /api/alerts/:id/context — the events leading up to the alert in its
/// session, chronological, each tagged `is_trigger` when it is one of the
/// alert's triggering events.
pub async fn alert_context(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Query(query): Query<ContextQuery>,
) -> ApiResult<impl IntoResponse> {
    let alert = load_alert(&state, &alert_id)?;
    let events = state.store.get_events_before(
        &alert.session_id,
        &alert.created_at,
        query.limit.clamp(1, 200),
    )?;

    let items: Vec<Value> = events
        .into_iter()
        .map(|event| {
            let is_trigger = alert.event_ids.contains(&event.id);
            let mut value = serde_json::to_value(&event).unwrap_or(Value::Null);
            if let Some(map) = value.as_object_mut() {
                map.insert("is_trigger".to_string(), Value::from(is_trigger));
            }
            value
        })
        .collect();

    Ok(Json(serde_json::json!({
        "alert_id": alert_id,
        "session_id": alert.session_id,
        "events": items,
    })))
}

/// GET /api/alerts/:id/graph — the subgraph around the alert's triggering
/// events: their nodes, ancestors to the root, and direct children.
pub async fn alert_graph(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let alert = load_alert(&state, &alert_id)?;
    let graph = state.store.get_alert_subgraph(&alert.event_ids)?;
    Ok(Json(graph))
}
