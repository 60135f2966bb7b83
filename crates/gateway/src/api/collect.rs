//! Hook collector endpoints.
//!
//! Every endpoint normalizes the payload, creates or updates the session,
//! persists the event, bumps the session's event counter, and queues the
//! event for async processing. Only `/pre-tool-use` blocks on a decision;
//! all other endpoints return a small acknowledgement.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};

use al_domain::{Decision, Event, HookPayload, Session};

use super::ApiResult;
use crate::state::AppState;

/// Endpoint identity: (hostname, user, source) from the payload first, then
/// the request headers, then defaults.
fn resolve_endpoint(
    payload: &HookPayload,
    headers: &HeaderMap,
) -> (Option<String>, Option<String>, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let hostname = payload
        .endpoint_hostname
        .clone()
        .or_else(|| header("x-endpoint-hostname"));
    let user = payload
        .endpoint_user
        .clone()
        .or_else(|| header("x-endpoint-user"));
    let source = payload
        .session_source
        .clone()
        .or_else(|| header("x-agentsleak-source"))
        .unwrap_or_else(|| "claude_code".to_string());
    (hostname, user, source)
}

fn session_from_payload(payload: &HookPayload, headers: &HeaderMap) -> Session {
    let (hostname, user, source) = resolve_endpoint(payload, headers);
    let mut session = Session::new(&payload.session_id);
    if let Some(ts) = payload.timestamp {
        session.started_at = ts;
    }
    session.cwd = payload.session_cwd.clone();
    session.parent_session_id = payload.parent_session_id.clone();
    session.endpoint_hostname = hostname;
    session.endpoint_user = user;
    session.session_source = Some(source);
    session
}

/// Create the session lazily on first sight. Existing sessions are left
/// untouched; the upsert never rewrites origin fields.
fn ensure_session(
    state: &AppState,
    payload: &HookPayload,
    headers: &HeaderMap,
) -> ApiResult<()> {
    if state.store.get_session_by_id(&payload.session_id)?.is_some() {
        return Ok(());
    }
    let session = session_from_payload(payload, headers);
    state.store.save_session(&session)?;
    state.engine.broadcast_session_update(&session);
    tracing::info!(session_id = %payload.session_id, "created new session");
    Ok(())
}

/// Persist the event, bump the counter, and hand off to the async queue.
fn record_and_enqueue(state: &AppState, event: Event) -> ApiResult<()> {
    state.store.save_event(&event)?;
    state.store.increment_session_event_count(&event.session_id)?;
    state.engine.enqueue(event);
    Ok(())
}

fn event_with_hook_type(payload: &HookPayload, hook_type: &str) -> Event {
    let mut event = Event::from_payload(payload);
    event.hook_type = hook_type.to_string();
    event
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/collect/pre-tool-use
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The only endpoint whose response affects agent behavior. Returns the
/// hook-protocol decision body; a failed evaluation fails open to allow so
/// a monitor bug cannot wedge the agent.
pub async fn pre_tool_use(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    tracing::debug!(
        session_id = %payload.session_id,
        tool = payload.tool_name.as_deref().unwrap_or(""),
        "PreToolUse"
    );
    ensure_session(&state, &payload, &headers)?;

    let mut event = event_with_hook_type(&payload, "PreToolUse");

    let decision = match state.engine.evaluate_pre_tool(&mut event) {
        Ok(decision) => decision,
        Err(err) => {
            tracing::error!(
                event_id = %event.id,
                error = %err,
                "pre-tool evaluation failed, allowing"
            );
            Decision::allow()
        }
    };

    record_and_enqueue(&state, event)?;
    Ok(Json(decision.to_hook_response()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Post / lifecycle hooks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post_tool_use(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    ensure_session(&state, &payload, &headers)?;
    record_and_enqueue(&state, event_with_hook_type(&payload, "PostToolUse"))?;
    Ok(Json(serde_json::json!({ "status": "received" })))
}

pub async fn post_tool_use_error(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    ensure_session(&state, &payload, &headers)?;
    record_and_enqueue(&state, event_with_hook_type(&payload, "PostToolUseFailure"))?;
    Ok(Json(serde_json::json!({ "status": "received" })))
}

pub async fn session_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(
        session_id = %payload.session_id,
        cwd = payload.session_cwd.as_deref().unwrap_or(""),
        "SessionStart"
    );
    let session = session_from_payload(&payload, &headers);
    state.store.save_session(&session)?;
    state.engine.broadcast_session_update(&session);

    record_and_enqueue(&state, event_with_hook_type(&payload, "SessionStart"))?;
    Ok(Json(serde_json::json!({
        "status": "session_started",
        "session_id": payload.session_id,
    })))
}

pub async fn session_end(
    State(state): State<AppState>,
    _headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(session_id = %payload.session_id, "SessionEnd");
    state.store.end_session(&payload.session_id)?;

    // Recording the end event bumps the counter, which reactivates the
    // session; re-end afterwards so the final state is ended.
    record_and_enqueue(&state, event_with_hook_type(&payload, "SessionEnd"))?;
    state.store.end_session(&payload.session_id)?;

    if let Some(session) = state.store.get_session_by_id(&payload.session_id)? {
        state.engine.broadcast_session_update(&session);
    }
    Ok(Json(serde_json::json!({
        "status": "session_ended",
        "session_id": payload.session_id,
    })))
}

pub async fn subagent_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(
        session_id = %payload.session_id,
        parent = payload.parent_session_id.as_deref().unwrap_or(""),
        "SubagentStart"
    );
    let session = session_from_payload(&payload, &headers);
    state.store.save_session(&session)?;
    state.engine.broadcast_session_update(&session);

    record_and_enqueue(&state, event_with_hook_type(&payload, "SubagentStart"))?;
    Ok(Json(serde_json::json!({
        "status": "subagent_started",
        "session_id": payload.session_id,
        "parent_session_id": payload.parent_session_id,
    })))
}

pub async fn subagent_stop(
    State(state): State<AppState>,
    _headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    tracing::info!(session_id = %payload.session_id, "SubagentStop");
    record_and_enqueue(&state, event_with_hook_type(&payload, "SubagentStop"))?;
    state.store.end_session(&payload.session_id)?;

    if let Some(session) = state.store.get_session_by_id(&payload.session_id)? {
        state.engine.broadcast_session_update(&session);
    }
    Ok(Json(serde_json::json!({
        "status": "subagent_stopped",
        "session_id": payload.session_id,
    })))
}

pub async fn permission_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    ensure_session(&state, &payload, &headers)?;
    record_and_enqueue(&state, event_with_hook_type(&payload, "PermissionRequest"))?;
    Ok(Json(serde_json::json!({ "status": "received" })))
}

pub async fn user_prompt_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<HookPayload>,
) -> ApiResult<impl IntoResponse> {
    ensure_session(&state, &payload, &headers)?;
    record_and_enqueue(&state, event_with_hook_type(&payload, "UserPromptSubmit"))?;
    Ok(Json(serde_json::json!({ "status": "received" })))
}

/// Collector health probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "service": "collector" }))
}
