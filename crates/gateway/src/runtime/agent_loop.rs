//! Agent turn execution — the per-message state machine.
//!
//! One turn: resolve user/conversation/persona, build context, call the
//! LLM, execute any tool calls concurrently (results appended in request
//! order), and iterate until a final text reply, a budget runs out, or the
//! turn is cancelled. Turns on the same conversation serialize FIFO;
//! different conversations run in parallel.
//!
//! Entry point: [`run_turn`] spawns the async loop and returns a channel
//! of [`AgentEvent`]s for SSE streaming.

use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use swb_domain::tool::{ChatMessage, ToolCall, ToolResult, UserContext};
use swb_modules::CancelToken;
use swb_providers::StopReason;

use crate::runtime::conversation::{Conversation, MessageKind, MessageRecord, NewMessage};
use crate::runtime::users::{Persona, User};
use crate::runtime::tools;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentEvent — the SSE event type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single agent turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model is invoking a tool.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    /// Tool execution result.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// The final assistant message (full text).
    Final { content: String },
    /// The turn was stopped by a cancellation request.
    Stopped { content: String },
    /// An error aborted the turn.
    Error { message: String },
    /// Token usage for the turn.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
pub struct AgentInput {
    pub user_id: String,
    pub conversation_id: String,
    pub content: String,
    /// Model override. `None` = configured default.
    pub model: Option<String>,
    /// Synthesized messages (continuations) are hidden from user-facing
    /// transcripts.
    pub hidden: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the orchestrator entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn. A new message cancels any in-flight turn on the
/// same conversation, then waits its turn on the conversation lock.
/// Returns the turn id and an event channel.
pub fn run_turn(state: AppState, input: AgentInput) -> (Uuid, mpsc::Receiver<AgentEvent>) {
    let (tx, rx) = mpsc::channel::<AgentEvent>(64);
    let turn_id = Uuid::new_v4();

    // Cancel whatever is currently running on this conversation; its loop
    // will observe the token and exit without a partial assistant message.
    state.cancel_map.cancel(&input.conversation_id);

    let span = tracing::info_span!(
        "turn",
        %turn_id,
        conversation_id = %input.conversation_id,
        user_id = %input.user_id,
    );
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            let conversation_id = input.conversation_id.clone();
            let _permit = state.conversation_locks.acquire(&conversation_id).await;
            let cancel = state.cancel_map.register(&conversation_id);

            // Partial text shared with the wall-clock abort path.
            let partial: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
            let budget =
                std::time::Duration::from_secs(state.config.agent.turn_timeout_secs.max(1));

            let outcome = tokio::time::timeout(
                budget,
                run_turn_inner(&state, &input, &tx, &cancel, partial.clone()),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "turn failed");
                    let message = format!("I hit an internal error and stopped: {e}");
                    persist_assistant(&state, &conversation_id, &message).await;
                    let _ = tx.send(AgentEvent::Error { message }).await;
                }
                Err(_) => {
                    tracing::warn!(budget_secs = budget.as_secs(), "turn wall clock exceeded");
                    let snapshot = partial.lock().clone();
                    let mut message =
                        format!("I ran out of time after {}s.", budget.as_secs());
                    if !snapshot.is_empty() {
                        message.push_str(" Partial reply: ");
                        message.push_str(&snapshot);
                    }
                    persist_assistant(&state, &conversation_id, &message).await;
                    let _ = tx.send(AgentEvent::Final { content: message }).await;
                }
            }

            state.cancel_map.remove(&conversation_id);
        },
        span,
    ));

    (turn_id, rx)
}

async fn persist_assistant(state: &AppState, conversation_id: &str, content: &str) {
    state
        .conversations
        .append(
            conversation_id,
            NewMessage::text(MessageKind::AssistantText, content),
        )
        .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The turn body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    input: &AgentInput,
    tx: &mpsc::Sender<AgentEvent>,
    cancel: &CancelToken,
    partial: Arc<Mutex<String>>,
) -> swb_domain::Result<()> {
    // ── S0: resolve user, conversation, persona ──────────────────
    let user = state
        .users
        .get_user(&input.user_id)
        .await
        .ok_or_else(|| swb_domain::Error::Fatal(format!("unknown user {}", input.user_id)))?;
    let conversation = state
        .conversations
        .get(&input.conversation_id)
        .await
        .ok_or_else(|| {
            swb_domain::Error::Fatal(format!("unknown conversation {}", input.conversation_id))
        })?;
    let persona = match &conversation.persona_id {
        Some(id) => state.users.get_persona(id).await,
        None => None,
    };

    let history = state
        .conversations
        .recent(&conversation.id, state.config.agent.history_limit)
        .await;

    state
        .conversations
        .append(
            &conversation.id,
            NewMessage {
                kind: MessageKind::UserText,
                content: input.content.clone(),
                call_id: None,
                tool_name: None,
                hidden: input.hidden,
            },
        )
        .await;

    // ── S1 + S2: context and tool visibility ─────────────────────
    state.registry.ensure_fresh().await;
    let tool_defs = tools::build_tool_definitions(state, &user, persona.as_ref());
    let system_prompt =
        build_system_prompt(state, &user, persona.as_ref(), &input.content, &tool_defs).await;

    let mut messages: Vec<ChatMessage> = Vec::new();
    messages.push(ChatMessage::system(&system_prompt));
    messages.extend(history_to_messages(&history));
    messages.push(ChatMessage::user(&input.content));

    let ctx = UserContext {
        user_id: user.id.clone(),
        platform: conversation.key.platform.clone(),
        channel: conversation.key.channel.clone(),
        thread: conversation.key.thread.clone(),
        conversation_id: conversation.id.clone(),
    };

    let model = input
        .model
        .clone()
        .unwrap_or_else(|| state.config.llm.default_model.clone());

    let mut total_input_tokens: u32 = 0;
    let mut total_output_tokens: u32 = 0;
    let max_iterations = state.config.agent.max_iterations;

    // ── S3/S4: invoke + branch, bounded by the iteration budget ──
    for iteration in 0..max_iterations {
        if cancel.is_cancelled() {
            let snapshot = partial.lock().clone();
            let _ = tx
                .send(AgentEvent::Stopped {
                    content: snapshot,
                })
                .await;
            return Ok(());
        }

        tracing::debug!(iteration, "agent loop iteration");
        let response = state
            .llm
            .complete(
                messages.clone(),
                &model,
                tool_defs.clone(),
                state.config.agent.temperature,
                state.config.agent.max_tokens,
            )
            .await?;

        total_input_tokens += response.input_tokens;
        total_output_tokens += response.output_tokens;
        if !response.content.is_empty() {
            *partial.lock() = response.content.clone();
        }

        // ── Final text reply ──────────────────────────────────────
        if response.stop_reason != StopReason::ToolUse || response.tool_calls.is_empty() {
            persist_assistant(state, &conversation.id, &response.content).await;
            let _ = tx
                .send(AgentEvent::Final {
                    content: response.content,
                })
                .await;
            let _ = tx
                .send(AgentEvent::Usage {
                    input_tokens: total_input_tokens,
                    output_tokens: total_output_tokens,
                })
                .await;
            return Ok(());
        }

        // ── Tool dispatch ─────────────────────────────────────────
        let calls = response.tool_calls;
        messages.push(ChatMessage::assistant_tool_calls(
            response.content.clone(),
            calls.clone(),
        ));
        if !response.content.is_empty() {
            persist_assistant(state, &conversation.id, &response.content).await;
        }

        for call in &calls {
            state
                .conversations
                .append(
                    &conversation.id,
                    NewMessage {
                        kind: MessageKind::ToolCall,
                        content: serde_json::to_string(&call.arguments).unwrap_or_default(),
                        call_id: Some(call.call_id.clone()),
                        tool_name: Some(call.tool_name.clone()),
                        hidden: false,
                    },
                )
                .await;
            let _ = tx
                .send(AgentEvent::ToolCall {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;
        }

        // All calls run concurrently; `join_all` preserves request order,
        // so the transcript stays deterministic regardless of completion
        // order. A cancellation mid-dispatch aborts each call at the HTTP
        // layer and its result comes back as a `cancelled` error — every
        // persisted tool_call still gets its matching tool_result.
        let futures: Vec<_> = calls
            .iter()
            .map(|call| execute_call(state, &tool_defs, call, &ctx, cancel))
            .collect();
        let results = join_all(futures).await;

        for (call, result) in calls.iter().zip(results) {
            let content = result.content();
            state
                .conversations
                .append(
                    &conversation.id,
                    NewMessage {
                        kind: MessageKind::ToolResult,
                        content: content.clone(),
                        call_id: Some(call.call_id.clone()),
                        tool_name: Some(call.tool_name.clone()),
                        hidden: false,
                    },
                )
                .await;
            let _ = tx
                .send(AgentEvent::ToolResult {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    content: content.clone(),
                    is_error: !result.success,
                })
                .await;
            messages.push(ChatMessage::tool_result(&call.call_id, content));
        }

        // Exit after recording the pairs; no partial assistant message is
        // written for a cancelled turn.
        if cancel.is_cancelled() {
            let snapshot = partial.lock().clone();
            let _ = tx
                .send(AgentEvent::Stopped {
                    content: snapshot,
                })
                .await;
            return Ok(());
        }

        if iteration == max_iterations - 1 {
            let message = format!(
                "I stopped after reaching the {max_iterations}-step tool budget for this message."
            );
            persist_assistant(state, &conversation.id, &message).await;
            let _ = tx.send(AgentEvent::Final { content: message }).await;
            return Ok(());
        }
    }

    Ok(())
}

/// Execute one call, answering `UnknownTool` for anything outside the
/// turn's visible tool set. A tool error never aborts the turn; the model
/// sees it as a result and decides what to do.
async fn execute_call(
    state: &AppState,
    tool_defs: &[swb_domain::manifest::ToolDefinition],
    call: &ToolCall,
    ctx: &UserContext,
    cancel: &CancelToken,
) -> ToolResult {
    if !tools::is_visible(tool_defs, &call.tool_name) {
        return ToolResult::err(&call.tool_name, "UnknownTool");
    }
    let span = tracing::info_span!("tool_call", tool_name = %call.tool_name);
    tracing::Instrument::instrument(
        tools::dispatch_tool(
            state,
            &call.tool_name,
            call.arguments.clone(),
            ctx,
            Some(cancel),
        ),
        span,
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context building
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a capable assistant with access to tools. Use them when they help; \
     answer directly when they don't.";

async fn build_system_prompt(
    state: &AppState,
    user: &User,
    persona: Option<&Persona>,
    message: &str,
    tool_defs: &[swb_domain::manifest::ToolDefinition],
) -> String {
    let mut sections: Vec<String> = Vec::new();
    sections.push(
        persona
            .map(|p| p.system_prompt.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
    );

    let memories = state.recall.recall(&user.id, message, 5).await;
    if !memories.is_empty() {
        sections.push(format!("Relevant memory:\n- {}", memories.join("\n- ")));
    }

    if !tool_defs.is_empty() {
        sections.push(tools::tool_summary(tool_defs));
    }
    sections.join("\n\n")
}

/// Past text records become LLM context; tool-call/result records are
/// per-turn working state and stay out of replayed history.
fn history_to_messages(history: &[MessageRecord]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter_map(|record| match record.kind {
            MessageKind::UserText => Some(ChatMessage::user(&record.content)),
            MessageKind::AssistantText => Some(ChatMessage::assistant(&record.content)),
            MessageKind::System => Some(ChatMessage::system(&record.content)),
            MessageKind::ToolCall | MessageKind::ToolResult => None,
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// handle_message — resolve-then-run convenience
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the conversation for a platform address and run a turn as the
/// (possibly first-seen) user.
pub async fn handle_message(
    state: &AppState,
    user_id: &str,
    key: &crate::runtime::conversation::ConversationKey,
    content: String,
    model: Option<String>,
) -> (Conversation, Uuid, mpsc::Receiver<AgentEvent>) {
    let user = state.users.ensure_user(user_id).await;
    let conversation = state.conversations.resolve_or_create(key, &user.id).await;
    let (turn_id, rx) = run_turn(
        state.clone(),
        AgentInput {
            user_id: user.id,
            conversation_id: conversation.id.clone(),
            content,
            model,
            hidden: false,
        },
    );
    (conversation, turn_id, rx)
}
