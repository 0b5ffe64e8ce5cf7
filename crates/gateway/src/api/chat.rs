//! Message ingress — adapters POST normalized inbound messages here and
//! read the turn back as an SSE stream of agent events.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::runtime::agent_loop;
use crate::runtime::conversation::ConversationKey;
use crate::state::AppState;

use super::{api_error, bearer_token, token_authorized};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    pub platform: String,
    pub channel: String,
    #[serde(default)]
    pub thread: Option<String>,
    pub content: String,
    /// Attachment URLs forwarded by the platform adapter.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Accept a user message and stream the turn's events back as SSE.
pub async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(inbound): Json<InboundMessage>,
) -> axum::response::Response {
    if !token_authorized(&state, bearer_token(&headers).as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    if inbound.content.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "content must not be empty");
    }

    let key = ConversationKey {
        platform: inbound.platform,
        channel: inbound.channel,
        thread: inbound.thread,
    };
    let mut content = inbound.content;
    if !inbound.attachments.is_empty() {
        content.push_str("\n\nAttachments:\n");
        for url in &inbound.attachments {
            content.push_str(&format!("- {url}\n"));
        }
    }
    let (conversation, turn_id, mut rx) =
        agent_loop::handle_message(&state, &inbound.user_id, &key, content, inbound.model).await;
    tracing::debug!(%turn_id, conversation_id = %conversation.id, "turn accepted");

    let stream = async_stream::stream! {
        yield Ok::<Event, std::convert::Infallible>(
            Event::default().event("accepted").data(conversation.id.clone()),
        );
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize agent event");
                }
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations/:id/transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

/// User-facing transcript. Hidden (synthesized) records appear only when
/// the conversation's persona requests them or the caller asks explicitly.
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<TranscriptQuery>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !token_authorized(&state, bearer_token(&headers).as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    let Some(conversation) = state.conversations.get(&conversation_id).await else {
        return api_error(StatusCode::NOT_FOUND, "conversation not found");
    };

    let persona_shows_hidden = match &conversation.persona_id {
        Some(id) => state
            .users
            .get_persona(id)
            .await
            .map(|p| p.show_continuations)
            .unwrap_or(false),
        None => false,
    };
    let include_hidden = query.include_hidden || persona_shows_hidden;

    let messages = state
        .conversations
        .transcript(&conversation_id, include_hidden)
        .await;
    Json(serde_json::json!({
        "conversation_id": conversation_id,
        "messages": messages,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Personas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `PUT /v1/personas` — create or replace a persona profile.
pub async fn upsert_persona(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(persona): Json<crate::runtime::users::Persona>,
) -> axum::response::Response {
    if !token_authorized(&state, bearer_token(&headers).as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    if persona.id.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "persona id must not be empty");
    }
    let id = persona.id.clone();
    state.users.upsert_persona(persona).await;
    Json(serde_json::json!({"persona_id": id})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SetPersonaBody {
    /// `null` clears the conversation's persona.
    pub persona_id: Option<String>,
}

/// `POST /v1/conversations/:id/persona` — switch the active persona.
pub async fn set_persona(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SetPersonaBody>,
) -> axum::response::Response {
    if !token_authorized(&state, bearer_token(&headers).as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    if let Some(persona_id) = &body.persona_id {
        if state.users.get_persona(persona_id).await.is_none() {
            return api_error(StatusCode::NOT_FOUND, "persona not found");
        }
    }
    if !state
        .conversations
        .set_persona(&conversation_id, body.persona_id.clone())
        .await
    {
        return api_error(StatusCode::NOT_FOUND, "conversation not found");
    }
    Json(serde_json::json!({
        "conversation_id": conversation_id,
        "persona_id": body.persona_id,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations/:id/stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stop_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !token_authorized(&state, bearer_token(&headers).as_deref()) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }
    let stopped = state.cancel_map.cancel(&conversation_id);
    Json(serde_json::json!({"stopped": stopped})).into_response()
}
