use serde::{Deserialize, Serialize};

use swb_domain::error::Result;
use swb_domain::manifest::ToolDefinition;
use swb_domain::tool::{ChatMessage, ToolCall};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier (already resolved by the router).
    pub model: String,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Textual content of the response.
    pub content: String,
    pub stop_reason: StopReason,
    /// Tool calls emitted by the model (empty unless `stop_reason` is
    /// `ToolUse`).
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// The model that actually produced the response.
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter implements.
///
/// Implementations translate between the internal types and the wire format
/// of one vendor's HTTP API (Anthropic Messages, OpenAI-compatible chat
/// completions, Google Gemini).
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn complete(&self, req: &ChatRequest) -> Result<LlmResponse>;

    /// Glob patterns for the model names this adapter serves.
    fn model_patterns(&self) -> &[String];

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
