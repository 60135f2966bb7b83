pub mod alerts;
pub mod auth;
pub mod collect;
pub mod events;
pub mod graph;
pub mod policies;
pub mod sessions;
pub mod stats;
pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::state::AppState;

/// Error carried out of handlers and mapped to an HTTP status with a
/// `{ "error": "<message>" }` body.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> ApiError {
        ApiError {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<al_store::Error> for ApiError {
    fn from(err: al_store::Error) -> ApiError {
        match &err {
            al_store::Error::NotFound(msg) => ApiError::new(StatusCode::NOT_FOUND, msg.clone()),
            al_store::Error::Conflict(msg) => ApiError::new(StatusCode::CONFLICT, msg.clone()),
            al_store::Error::InvalidArgument(msg) => {
                ApiError::new(StatusCode::BAD_REQUEST, msg.clone())
            }
            _ => {
                tracing::error!(error = %err, "internal store error");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

/// Build the full API router.
///
/// Routes split into three groups: **public** (health probes and the
/// WebSocket, which authenticates via query token inside the handler),
/// **collector** (gated by the `X-AgentsLeak-Key` middleware), and
/// **dashboard** (gated by the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/api/health", get(health))
        .route("/api/collect/health", get(collect::health))
        .route("/api/ws", get(ws::websocket));

    let collector = Router::new()
        .route("/api/collect/pre-tool-use", post(collect::pre_tool_use))
        .route("/api/collect/post-tool-use", post(collect::post_tool_use))
        .route(
            "/api/collect/post-tool-use-error",
            post(collect::post_tool_use_error),
        )
        .route("/api/collect/session-start", post(collect::session_start))
        .route("/api/collect/session-end", post(collect::session_end))
        .route("/api/collect/subagent-start", post(collect::subagent_start))
        .route("/api/collect/subagent-stop", post(collect::subagent_stop))
        .route(
            "/api/collect/permission-request",
            post(collect::permission_request),
        )
        .route(
            "/api/collect/user-prompt-submit",
            post(collect::user_prompt_submit),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_collector_key,
        ));

    let dashboard = Router::new()
        // Sessions
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id/events", get(sessions::session_events))
        .route("/api/sessions/:id/timeline", get(sessions::session_timeline))
        .route("/api/sessions/:id/terminate", post(sessions::terminate_session))
        // Events
        .route("/api/events", get(events::list_events))
        .route("/api/events/:id", get(events::get_event))
        // Alerts
        .route("/api/alerts", get(alerts::list_alerts))
        .route("/api/alerts/:id", get(alerts::get_alert))
        .route("/api/alerts/:id", patch(alerts::update_alert))
        .route("/api/alerts/:id/acknowledge", post(alerts::acknowledge_alert))
        .route("/api/alerts/:id/resolve", post(alerts::resolve_alert))
        .route("/api/alerts/:id/context", get(alerts::alert_context))
        .route("/api/alerts/:id/graph", get(alerts::alert_graph))
        // Policies
        .route("/api/policies", get(policies::list_policies))
        .route("/api/policies", post(policies::create_policy))
        .route("/api/policies/:id", get(policies::get_policy))
        .route("/api/policies/:id", put(policies::update_policy))
        .route("/api/policies/:id", delete(policies::delete_policy))
        .route("/api/policies/:id/toggle", post(policies::toggle_policy))
        // Graph
        .route("/api/graph/session/:id", get(graph::session_graph))
        .route("/api/graph/global", get(graph::global_graph))
        // Stats
        .route("/api/stats/dashboard", get(stats::dashboard))
        .route("/api/stats/endpoints", get(stats::endpoints))
        .route("/api/stats/timeline", get(stats::timeline))
        .route("/api/stats/top-files", get(stats::top_files))
        .route("/api/stats/top-commands", get(stats::top_commands))
        .route("/api/stats/top-domains", get(stats::top_domains))
        // Overview
        .route("/api/overview", get(overview))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_dashboard_token,
        ));

    public
        .merge(collector)
        .merge(dashboard)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Global health probe.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy", "service": "agentsleak" }))
}

/// Basic overview counts for the dashboard landing page.
async fn overview(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let store = &state.store;
    Ok(Json(serde_json::json!({
        "total_sessions": store.get_session_count(None)?,
        "active_sessions": store.get_session_count(Some("active"))?,
        "total_events": store.get_event_count(None, None, None)?,
        "total_alerts": store.get_alert_count(None, None)?,
        "new_alerts": store.get_alert_count(None, Some("new"))?,
    })))
}
