//! Dashboard aggregation endpoints.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub endpoint: Option<String>,
}

/// GET /api/stats/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<impl IntoResponse> {
    let stats = state.store.get_dashboard_stats(
        query.from_date.as_ref(),
        query.to_date.as_ref(),
        query.endpoint.as_deref(),
    )?;
    Ok(Json(stats))
}

/// GET /api/stats/endpoints
pub async fn endpoints(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let endpoints = state.store.get_endpoint_stats()?;
    let unique = state.store.get_unique_endpoint_count()?;
    Ok(Json(serde_json::json!({
        "endpoints": endpoints,
        "unique_endpoints": unique,
    })))
}

fn default_interval() -> String {
    "hour".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    #[serde(default = "default_interval")]
    pub interval: String,
    pub session_id: Option<String>,
    pub endpoint: Option<String>,
}

/// GET /api/stats/timeline — defaults to the last 24 hours.
pub async fn timeline(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<impl IntoResponse> {
    let to = query.to_date.unwrap_or_else(Utc::now);
    let from = query.from_date.unwrap_or(to - Duration::hours(24));
    let stats = state.store.get_timeline_stats(
        &from,
        &to,
        &query.interval,
        query.session_id.as_deref(),
        query.endpoint.as_deref(),
    )?;
    Ok(Json(stats))
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub sort_by: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub endpoint: Option<String>,
}

/// GET /api/stats/top-files
pub async fn top_files(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> ApiResult<impl IntoResponse> {
    let files = state.store.get_top_files(
        query.limit.min(500),
        query.sort_by.as_deref().unwrap_or("total_access"),
        query.from_date.as_ref(),
        query.to_date.as_ref(),
        query.endpoint.as_deref(),
    )?;
    Ok(Json(serde_json::json!({ "items": files })))
}

/// GET /api/stats/top-commands
pub async fn top_commands(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> ApiResult<impl IntoResponse> {
    let commands = state.store.get_top_commands(
        query.limit.min(500),
        query.sort_by.as_deref().unwrap_or("execution_count"),
        query.from_date.as_ref(),
        query.to_date.as_ref(),
        query.endpoint.as_deref(),
    )?;
    Ok(Json(serde_json::json!({ "items": commands })))
}

/// GET /api/stats/top-domains
pub async fn top_domains(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> ApiResult<impl IntoResponse> {
    let domains = state.store.get_top_domains(
        query.limit.min(500),
        query.sort_by.as_deref().unwrap_or("access_count"),
        query.from_date.as_ref(),
        query.to_date.as_ref(),
        query.endpoint.as_deref(),
    )?;
    Ok(Json(serde_json::json!({ "items": domains })))
}
