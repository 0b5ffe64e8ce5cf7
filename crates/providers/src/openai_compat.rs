//! OpenAI-compatible adapter.
//!
//! Speaks the `/chat/completions` dialect shared by OpenAI, Groq, Mistral,
//! local inference servers, and most gateway proxies. Tool-call arguments
//! arrive as JSON-encoded strings and are decoded here.

use serde_json::Value;

use swb_domain::config::ProviderConfig;
use swb_domain::error::{Error, Result};
use swb_domain::tool::{ChatMessage, Role, ToolCall};

use crate::traits::{ChatRequest, LlmProvider, LlmResponse, StopReason};
use crate::util::{from_reqwest, http_status_error, resolve_api_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    model_patterns: Vec<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
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
        let messages: Vec<Value> = req.messages.iter().map(message_to_openai).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema(),
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }

        body
    }
}

fn message_to_openai(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::System => serde_json::json!({"role": "system", "content": msg.content}),
        Role::User => serde_json::json!({"role": "user", "content": msg.content}),
        Role::Assistant => {
            let mut m = serde_json::json!({"role": "assistant", "content": msg.content});
            if let Some(calls) = &msg.tool_calls {
                let tool_calls: Vec<Value> = calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.call_id,
                            "type": "function",
                            "function": {
                                "name": tc.tool_name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".into()),
                            }
                        })
                    })
                    .collect();
                m["tool_calls"] = Value::Array(tool_calls);
            }
            m
        }
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(provider_id: &str, body: &Value) -> Result<LlmResponse> {
    let choice = body
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider_id.to_string(),
            message: "response has no choices".into(),
        })?;

    let message = choice.get("message").cloned().unwrap_or(Value::Null);
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls: Vec<ToolCall> = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            let args_str = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            // Some models emit empty or malformed argument strings; default
            // to an empty object rather than failing the whole turn.
            let arguments: Value = serde_json::from_str(args_str).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "tool call arguments are not valid JSON");
                Value::Object(Default::default())
            });
            tool_calls.push(ToolCall {
                call_id: call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                tool_name: function
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            });
        }
    }

    let stop_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        _ => {
            if tool_calls.is_empty() {
                StopReason::EndTurn
            } else {
                StopReason::ToolUse
            }
        }
    };

    let usage = body.get("usage").cloned().unwrap_or(Value::Null);
    Ok(LlmResponse {
        content,
        stop_reason,
        tool_calls,
        input_tokens: usage
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        output_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        model: body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
        parse_response(&self.id, &body)
    }

    fn model_patterns(&self) -> &[String] {
        &self.model_patterns
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiCompatProvider {
        OpenAiCompatProvider {
            id: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: "sk-test".into(),
            model_patterns: vec!["gpt-*".into()],
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn body_includes_tool_declarations() {
        use swb_domain::manifest::{Permission, ToolDefinition};
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolDefinition {
                name: "jira.create_issue".into(),
                description: "Create an issue".into(),
                parameters: vec![],
                required_permission: Permission::User,
            }],
            model: "gpt-4o".into(),
            temperature: None,
            max_tokens: Some(512),
        };
        let body = provider().build_body(&req);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "jira.create_issue");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let msg = ChatMessage::assistant_tool_calls(
            "",
            vec![ToolCall {
                call_id: "call_1".into(),
                tool_name: "a.b".into(),
                arguments: serde_json::json!({"x": 1}),
            }],
        );
        let v = message_to_openai(&msg);
        assert_eq!(v["tool_calls"][0]["function"]["arguments"], "{\"x\":1}");
    }

    #[test]
    fn parse_tool_call_response() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "a.b", "arguments": "{\"x\": 2}"},
                    }],
                },
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3},
        });
        let resp = parse_response("openai", &body).unwrap();
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.tool_calls[0].arguments["x"], 2);
        assert_eq!(resp.input_tokens, 7);
    }

    #[test]
    fn parse_malformed_arguments_defaults_to_empty_object() {
        let body = serde_json::json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "a.b", "arguments": "not json"},
                    }],
                },
            }],
        });
        let resp = parse_response("openai", &body).unwrap();
        assert_eq!(resp.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn parse_length_finish_reason() {
        let body = serde_json::json!({
            "choices": [{"finish_reason": "length", "message": {"content": "trunc"}}],
        });
        let resp = parse_response("openai", &body).unwrap();
        assert_eq!(resp.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn parse_no_choices_errors() {
        let body = serde_json::json!({"choices": []});
        assert!(parse_response("openai", &body).is_err());
    }
}
