//! HTTP/WS API surface.

pub mod chat;
pub mod task_ws;
pub mod webhooks;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Constant-time bearer/query token check against the startup-computed
/// hash. `None` hash = dev mode, everything allowed.
pub(crate) fn token_authorized(state: &AppState, provided: Option<&str>) -> bool {
    let Some(expected_hash) = &state.api_token_hash else {
        return true;
    };
    let Some(provided) = provided else {
        return false;
    };
    let provided_hash = Sha256::digest(provided.as_bytes());
    provided_hash.ct_eq(expected_hash.as_slice()).into()
}

pub(crate) fn bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/messages", post(chat::post_message))
        .route("/v1/conversations/:id/transcript", get(chat::get_transcript))
        .route("/v1/conversations/:id/persona", post(chat::set_persona))
        .route("/v1/conversations/:id/stop", post(chat::stop_conversation))
        .route("/v1/personas", put(chat::upsert_persona))
        // Unauthenticated by design; HMAC guards individual jobs.
        .route("/webhook/:job_id", post(webhooks::fire))
        .route("/api/tasks/:id/logs/ws", get(task_ws::logs_ws))
        .route("/api/tasks/:id/terminal/ws", get(task_ws::terminal_ws))
        .route("/api/tasks/:id/workspace/upload", post(task_ws::upload))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let module_errors: Vec<serde_json::Value> = state
        .registry
        .module_errors()
        .into_iter()
        .map(|e| serde_json::json!({"module": e.module_name, "error": e.error, "at": e.at}))
        .collect();
    Json(serde_json::json!({
        "status": "ok",
        "modules": state.registry.module_count(),
        "module_errors": module_errors,
        "notifications_dropped": state.notifier.dropped_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    #[tokio::test]
    async fn dev_mode_allows_everything() {
        let (_env, state) = test_state();
        assert!(token_authorized(&state, None));
        assert!(token_authorized(&state, Some("anything")));
    }

    #[tokio::test]
    async fn token_checked_when_configured() {
        let (_env, mut state) = test_state();
        state.api_token_hash = Some(Sha256::digest(b"secret-token").to_vec());
        assert!(token_authorized(&state, Some("secret-token")));
        assert!(!token_authorized(&state, Some("wrong")));
        assert!(!token_authorized(&state, None));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer tok-123".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-123"));

        headers.insert(axum::http::header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
