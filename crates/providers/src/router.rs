//! Model router with fallback.
//!
//! Resolves the adapter for a requested model by glob pattern, and on
//! **transient** failures (network, 5xx, rate-limit with a long
//! `Retry-After`) retries the same request against the configured fallback
//! chain. Non-transient errors fail immediately. Before returning, emitted
//! tool calls are checked against the offered tool set; unknown names are
//! dropped.

use std::sync::Arc;

use swb_domain::config::LlmConfig;
use swb_domain::error::{Error, Result};
use swb_domain::manifest::ToolDefinition;
use swb_domain::tool::ChatMessage;

use crate::registry::ProviderRegistry;
use crate::traits::{ChatRequest, LlmResponse, StopReason};
use crate::util::{parse_retry_after, parse_status};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmRouter {
    registry: Arc<ProviderRegistry>,
    fallback_chain: Vec<String>,
    request_timeout_secs: u64,
    retry_after_threshold_secs: u64,
}

impl LlmRouter {
    pub fn from_config(registry: Arc<ProviderRegistry>, config: &LlmConfig) -> Self {
        Self {
            registry,
            fallback_chain: config.fallback_chain.clone(),
            request_timeout_secs: config.request_timeout_secs,
            retry_after_threshold_secs: config.retry_after_threshold_secs,
        }
    }

    /// Send a chat request for the given model:
    ///
    /// 1. Resolve the adapter whose patterns match `model`; no match fails
    ///    with `UnknownModel`.
    /// 2. Send the request with a timeout wrapper.
    /// 3. On transient failure, try each fallback-chain model (skipping the
    ///    one that just failed) with the same messages and tools.
    /// 4. Surface the last failure once the chain is exhausted.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        tools: Vec<ToolDefinition>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<LlmResponse> {
        let req = ChatRequest {
            messages,
            tools,
            model: model.to_string(),
            temperature,
            max_tokens,
        };

        // The requested model must be routable; fallbacks are best-effort.
        let primary = self
            .registry
            .match_model(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))?;

        let mut last_error = match self.try_model(&primary, &req, model).await {
            Ok(resp) => return Ok(self.validate_tool_calls(resp, &req.tools)),
            Err(e) if self.is_transient(&e) => {
                tracing::warn!(
                    provider = %primary.provider_id(),
                    model = %model,
                    error = %e,
                    "primary model failed, trying fallbacks"
                );
                e
            }
            Err(e) => return Err(e),
        };

        for fallback in &self.fallback_chain {
            if fallback == model {
                continue;
            }
            let provider = match self.registry.match_model(fallback) {
                Some(p) => p,
                None => {
                    tracing::warn!(model = %fallback, "no adapter for fallback model, skipping");
                    continue;
                }
            };

            match self.try_model(&provider, &req, fallback).await {
                Ok(resp) => return Ok(self.validate_tool_calls(resp, &req.tools)),
                Err(e) if self.is_transient(&e) => {
                    tracing::warn!(
                        provider = %provider.provider_id(),
                        model = %fallback,
                        error = %e,
                        "fallback model failed, trying next"
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    // ── Internal helpers ───────────────────────────────────────────

    async fn try_model(
        &self,
        provider: &Arc<dyn crate::traits::LlmProvider>,
        req: &ChatRequest,
        model: &str,
    ) -> Result<LlmResponse> {
        let mut attempt = req.clone();
        attempt.model = model.to_string();
        let timeout = std::time::Duration::from_secs(self.request_timeout_secs);
        match tokio::time::timeout(timeout, provider.complete(&attempt)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "provider '{}' timed out after {}s",
                provider.provider_id(),
                self.request_timeout_secs
            ))),
        }
    }

    /// Transient = worth routing to the next model: network errors,
    /// timeouts, 5xx, and 429s whose `Retry-After` exceeds the threshold.
    /// Everything else (other 4xx, schema errors) fails immediately.
    fn is_transient(&self, err: &Error) -> bool {
        match err {
            Error::Timeout(_) | Error::Http(_) => true,
            Error::Provider { message, .. } => match parse_status(message) {
                Some(status) if status >= 500 => true,
                Some(429) => parse_retry_after(message)
                    .map(|secs| secs > self.retry_after_threshold_secs)
                    .unwrap_or(true),
                _ => false,
            },
            _ => false,
        }
    }

    /// Drop tool calls that reference tools absent from the offered set.
    /// If nothing valid remains, downgrade to `end_turn` and append a short
    /// warning so the transcript records what happened.
    fn validate_tool_calls(
        &self,
        mut resp: LlmResponse,
        tools: &[ToolDefinition],
    ) -> LlmResponse {
        if resp.tool_calls.is_empty() {
            return resp;
        }
        let before = resp.tool_calls.len();
        resp.tool_calls
            .retain(|tc| tools.iter().any(|t| t.name == tc.tool_name));
        let dropped = before - resp.tool_calls.len();
        if dropped > 0 {
            tracing::warn!(dropped, model = %resp.model, "model invoked unknown tools");
            if resp.tool_calls.is_empty() {
                resp.stop_reason = StopReason::EndTurn;
                if !resp.content.is_empty() {
                    resp.content.push('\n');
                }
                resp.content
                    .push_str("(a tool call referencing an unavailable tool was discarded)");
            }
        }
        resp
    }
}
