//! Webhook ingress — `POST /webhook/{job_id}`.
//!
//! Unauthenticated by design; a job configured with a `secret` requires
//! `X-Webhook-Signature: sha256=<hex>`, the HMAC-SHA256 of the raw body.
//! Signature mismatch returns 401 and counts nothing. A repeated delivery
//! of the same body within the replay window acks 200 without re-firing.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::runtime::scheduler::model::{JobType, WebhookConfig};
use crate::runtime::scheduler::worker;
use crate::state::AppState;

use super::api_error;

type HmacSha256 = Hmac<Sha256>;

pub async fn fire(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 1. Look up the job; only webhook jobs fire here.
    let Some(job) = state.jobs.get(&job_id).await else {
        return api_error(StatusCode::NOT_FOUND, "job not found");
    };
    if job.job_type != JobType::Webhook {
        return api_error(StatusCode::NOT_FOUND, "job is not a webhook job");
    }

    // 2. Verify the HMAC signature when a secret is configured. This runs
    //    before any counter or state is touched.
    let config: WebhookConfig = serde_json::from_value(job.check_config.clone())
        .unwrap_or_default();
    if let Some(secret) = &config.secret {
        let signature = headers
            .get("x-webhook-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let signature_hex = signature.strip_prefix("sha256=").unwrap_or(signature);

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(&body);
        let computed = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison to prevent timing attacks.
        if computed.as_bytes().ct_eq(signature_hex.as_bytes()).unwrap_u8() != 1 {
            tracing::warn!(job_id = %job_id, "webhook signature mismatch");
            return api_error(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    // 3. Replay window: an identical delivery acks without re-firing.
    let body_hash: [u8; 32] = Sha256::digest(&body).into();
    if state.webhook_dedupe.check_and_insert(job_id, body_hash) {
        tracing::debug!(job_id = %job_id, "webhook replay within window, acked without firing");
        return (StatusCode::OK, Json(serde_json::json!({"fired": false}))).into_response();
    }

    // 4. Terminal jobs ack idempotently; active jobs fire exactly once.
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or_else(|_| {
        serde_json::json!({"raw": String::from_utf8_lossy(&body).into_owned()})
    });
    let fired = worker::fire_webhook(&state, &job, payload).await;
    tracing::info!(job_id = %job_id, fired, "webhook received");
    (StatusCode::OK, Json(serde_json::json!({"fired": fired}))).into_response()
}
