//! Policy CRUD API. Creates return 409 on a name conflict and 400 on
//! unknown enum values; every mutation reloads the engine's policy cache.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::Value;
use uuid::Uuid;

use al_domain::Policy;

use super::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/policies — all policies with their alert counts.
pub async fn list_policies(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let policies = state.store.get_policies(false)?;
    let alert_counts = state.store.get_alert_counts_by_policy()?;

    let items: Vec<Value> = policies
        .iter()
        .map(|policy| {
            let mut value = serde_json::to_value(policy).unwrap_or(Value::Null);
            if let Some(map) = value.as_object_mut() {
                let count = alert_counts
                    .get(&policy.id.to_string())
                    .copied()
                    .unwrap_or(0);
                map.insert("alert_count".to_string(), Value::from(count));
            }
            value
        })
        .collect();

    Ok(Json(serde_json::json!({
        "items": items,
        "total": items.len(),
    })))
}

/// POST /api/policies
pub async fn create_policy(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let policy: Policy = serde_json::from_value(body)
        .map_err(|err| ApiError::bad_request(format!("invalid policy: {err}")))?;

    if state.store.get_policy_by_name(&policy.name)?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("a policy named {:?} already exists", policy.name),
        ));
    }

    state.store.save_policy(&policy)?;
    state.engine.reload_policies();

    let created = state
        .store
        .get_policy_by_name(&policy.name)?
        .ok_or_else(|| ApiError::not_found("policy vanished after save"))?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/policies/:id
pub async fn get_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let policy = state
        .store
        .get_policy_by_id(&policy_id)?
        .ok_or_else(|| ApiError::not_found(format!("policy {policy_id}")))?;
    Ok(Json(policy))
}

/// PUT /api/policies/:id — patch of the editable fields.
pub async fn update_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let patch = body
        .as_object()
        .ok_or_else(|| ApiError::bad_request("update body must be an object"))?;
    let updated = state.store.update_policy(&policy_id, patch)?;
    state.engine.reload_policies();
    Ok(Json(updated))
}

/// DELETE /api/policies/:id
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.store.delete_policy(&policy_id)?;
    state.engine.reload_policies();
    Ok(Json(serde_json::json!({ "status": "deleted", "id": policy_id })))
}

/// POST /api/policies/:id/toggle
pub async fn toggle_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let policy = state
        .store
        .get_policy_by_id(&policy_id)?
        .ok_or_else(|| ApiError::not_found(format!("policy {policy_id}")))?;

    let mut patch = serde_json::Map::new();
    patch.insert("enabled".to_string(), Value::from(!policy.enabled));
    let updated = state.store.update_policy(&policy_id, &patch)?;
    state.engine.reload_policies();
    Ok(Json(updated))
}
