//! Authentication middleware.
//!
//! Two independent secrets, both optional and both compared in constant
//! time via SHA-256 digests computed once at startup:
//! - the collector key guards `/api/collect/*` (`X-AgentsLeak-Key` header);
//! - the dashboard token guards the rest of `/api/*`
//!   (`Authorization: Bearer` for REST, `?token=` for the WebSocket).
//!
//! An unset secret disables that check (dev mode); health probes and static
//! assets are never authenticated.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Constant-time comparison of a provided secret against a stored digest.
/// Hashing normalizes lengths so `ct_eq` always compares 32 bytes.
pub fn token_matches(expected_hash: &[u8], provided: &str) -> bool {
    let provided_hash = Sha256::digest(provided.as_bytes());
    provided_hash.ct_eq(expected_hash).into()
}

fn unauthorized(message: &str) -> Response {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Gate for the hook collector endpoints.
pub async fn require_collector_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = match &state.collector_key_hash {
        Some(hash) => hash,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("x-agentsleak-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !token_matches(expected, provided) {
        return unauthorized("invalid or missing API key");
    }
    next.run(req).await
}

/// Gate for the dashboard REST surface.
pub async fn require_dashboard_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = match &state.dashboard_token_hash {
        Some(hash) => hash,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if !token_matches(expected, provided) {
        return unauthorized("invalid or missing dashboard token");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_comparison_matches_exact_secret_only() {
        let hash = Sha256::digest(b"secret").to_vec();
        assert!(token_matches(&hash, "secret"));
        assert!(!token_matches(&hash, "Secret"));
        assert!(!token_matches(&hash, ""));
        assert!(!token_matches(&hash, "secret2"));
    }
}
