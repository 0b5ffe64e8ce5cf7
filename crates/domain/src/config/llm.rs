use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenaiCompat,
    Google,
}

/// How a provider resolves its API key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Plaintext key (discouraged; prefer `env`).
    #[serde(default)]
    pub key: Option<String>,
    /// Environment variable to read the key from.
    #[serde(default)]
    pub env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable id used in logs and fallback-chain entries.
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Glob patterns for the model names this adapter serves
    /// (e.g. `claude-*`, `gpt-4*`, `gemini-*`).
    #[serde(default)]
    pub model_patterns: Vec<String>,
    /// Model used when a request names no model.
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Model used when a conversation has no override.
    #[serde(default = "d_default_model")]
    pub default_model: String,
    /// Models tried, in order, after the requested one fails transiently.
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    /// Per-request timeout applied around each provider call.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// A 429 whose `Retry-After` exceeds this is treated as transient and
    /// routed to the next fallback instead of waited out.
    #[serde(default = "d_retry_after_threshold_secs")]
    pub retry_after_threshold_secs: u64,
}

fn d_default_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn d_request_timeout_secs() -> u64 {
    120
}

fn d_retry_after_threshold_secs() -> u64 {
    5
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_model: d_default_model(),
            fallback_chain: Vec::new(),
            request_timeout_secs: d_request_timeout_secs(),
            retry_after_threshold_secs: d_retry_after_threshold_secs(),
        }
    }
}
