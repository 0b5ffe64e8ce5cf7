//! Google Gemini adapter.
//!
//! Speaks the `generateContent` API. Gemini has no tool-call ids, so this
//! adapter synthesizes `call-<n>` correlation ids per response.

use serde_json::Value;

use swb_domain::config::ProviderConfig;
use swb_domain::error::{Error, Result};
use swb_domain::tool::{ChatMessage, Role, ToolCall};

use crate::traits::{ChatRequest, LlmProvider, LlmResponse, StopReason};
use crate::util::{from_reqwest, http_status_error, resolve_api_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    model_patterns: Vec<String>,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn from_config(cfg: &ProviderConfig, timeout_secs: u64) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model_patterns: cfg.model_patterns.clone(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.clone()),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content}],
                })),
                Role::Assistant => {
                    let mut parts: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(serde_json::json!({"text": msg.content}));
                    }
                    if let Some(calls) = &msg.tool_calls {
                        for tc in calls {
                            parts.push(serde_json::json!({
                                "functionCall": {
                                    "name": tc.tool_name,
                                    "args": tc.arguments,
                                }
                            }));
                        }
                    }
                    contents.push(serde_json::json!({"role": "model", "parts": parts}));
                }
                // Tool results become functionResponse parts in a user turn.
                Role::Tool => {
                    let response: Value = serde_json::from_str(&msg.content)
                        .unwrap_or_else(|_| serde_json::json!({"content": msg.content}));
                    contents.push(serde_json::json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": msg.tool_call_id.clone().unwrap_or_default(),
                                "response": response,
                            }
                        }],
                    }));
                }
            }
        }

        let mut body = serde_json::json!({"contents": contents});

        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n\n")}],
            });
        }
        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema(),
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = req.temperature {
            generation_config.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.max_tokens {
            generation_config.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(provider_id: &str, model: &str, body: &Value) -> Result<LlmResponse> {
    let candidate = body
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider_id.to_string(),
            message: "response has no candidates".into(),
        })?;

    let empty = Vec::new();
    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for part in parts {
        if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
            text_parts.push(text.to_string());
        }
        if let Some(call) = part.get("functionCall") {
            tool_calls.push(ToolCall {
                call_id: format!("call-{}", tool_calls.len() + 1),
                tool_name: call
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                arguments: call.get("args").cloned().unwrap_or(Value::Null),
            });
        }
    }

    let stop_reason = if !tool_calls.is_empty() {
        StopReason::ToolUse
    } else {
        match candidate.get("finishReason").and_then(|v| v.as_str()) {
            Some("MAX_TOKENS") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    };

    let usage = body.get("usageMetadata").cloned().unwrap_or(Value::Null);
    Ok(LlmResponse {
        content: text_parts.join("\n"),
        stop_reason,
        tool_calls,
        input_tokens: usage
            .get("promptTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        output_tokens: usage
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        model: model.to_string(),
    })
}

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, req.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&self.build_body(req))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(http_status_error(&self.id, status.as_u16(), retry_after, &body));
        }

        let body: Value = response.json().await.map_err(from_reqwest)?;
        parse_response(&self.id, &req.model, &body)
    }

    fn model_patterns(&self) -> &[String] {
        &self.model_patterns
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
