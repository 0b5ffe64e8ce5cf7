//! Tool dispatcher — executes a single tool call on its owning module.
//!
//! The dispatcher never raises: network errors, non-2xx responses, and
//! timeouts all come back as `ToolResult { success: false, .. }` so the
//! caller (agent loop or scheduler) decides what failure means. Retry is
//! the caller's decision; the dispatcher makes exactly one attempt.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use swb_domain::config::ModulesConfig;
use swb_domain::error::Error;
use swb_domain::tool::{ToolCall, ToolResult, UserContext};

use crate::cancel::CancelToken;
use crate::registry::ModuleRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolDispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolDispatcher {
    registry: Arc<ModuleRegistry>,
    client: reqwest::Client,
    execute_timeout: Duration,
    slow_execute_timeout: Duration,
    config: ModulesConfig,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ModuleRegistry>, config: &ModulesConfig) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            execute_timeout: Duration::from_secs(config.execute_timeout_secs),
            slow_execute_timeout: Duration::from_secs(config.slow_execute_timeout_secs),
            config: config.clone(),
        }
    }

    /// Execute one tool call against its module.
    ///
    /// The authoritative `user_context` is merged into the arguments under
    /// the reserved keys, overwriting whatever the LLM supplied — a tool
    /// call can never operate as a different user. When `cancel` fires, the
    /// request is dropped at the connection layer and a `cancelled` result
    /// is returned; the `X-Cancel` header carries the correlation id so
    /// cooperative modules can abort early.
    pub async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        user_context: &UserContext,
        cancel: Option<&CancelToken>,
    ) -> ToolResult {
        let (module_url, _tool) = match self.registry.lookup(tool_name) {
            Ok(found) => found,
            Err(Error::UnknownTool(_)) => {
                return ToolResult::err(tool_name, "UnknownTool");
            }
            Err(e) => return ToolResult::err(tool_name, e.to_string()),
        };

        // ── Context injection ─────────────────────────────────────
        let mut args_map = match arguments {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                tracing::warn!(tool = %tool_name, "non-object tool arguments: {other}");
                serde_json::Map::new()
            }
        };
        user_context.inject_into(&mut args_map);

        let call_id = uuid_like_correlation_id();
        let call = ToolCall {
            call_id: call_id.clone(),
            tool_name: tool_name.to_string(),
            arguments: Value::Object(args_map),
        };

        let timeout = if self.config.is_slow_tool(tool_name) {
            self.slow_execute_timeout
        } else {
            self.execute_timeout
        };

        let url = format!("{}/execute", module_url.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .header("X-Cancel", &call_id)
            .timeout(timeout)
            .json(&call)
            .send();

        // Race the request against cancellation: dropping the future closes
        // the connection, which is the strongest signal we can give a module
        // that does not honor X-Cancel.
        let response = match cancel {
            Some(token) => {
                tokio::select! {
                    r = request => r,
                    _ = token.cancelled() => {
                        tracing::debug!(tool = %tool_name, call_id = %call_id, "tool call cancelled");
                        return ToolResult::err(tool_name, "cancelled");
                    }
                }
            }
            None => request.await,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ToolResult::err(
                    tool_name,
                    format!("timeout after {}s", timeout.as_secs()),
                );
            }
            Err(e) => return ToolResult::err(tool_name, format!("network error: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            return ToolResult::err(tool_name, format!("HTTP {}: {preview}", status.as_u16()));
        }

        match response.json::<ToolResult>().await {
            Ok(result) => result,
            Err(e) => ToolResult::err(tool_name, format!("invalid response body: {e}")),
        }
    }
}

/// Correlation ids are opaque to modules; a timestamp+counter pair keeps the
/// crate free of a uuid dependency here.
fn uuid_like_correlation_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("call-{}-{n}", chrono::Utc::now().timestamp_millis())
}
