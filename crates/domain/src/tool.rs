//! Provider-agnostic conversation and tool-call types.
//!
//! Every LLM adapter converts between these shapes and its vendor wire
//! format; every module service receives a [`ToolCall`] and answers with a
//! [`ToolResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the canonical conversation format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on assistant messages that invoke tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Assistant message carrying tool invocations (content may be empty).
    pub fn assistant_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool invocation emitted by the LLM. `call_id` is the per-invocation
/// correlation id threaded through to the matching result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The outcome of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Render the result (or error) as the text handed back to the LLM.
    pub fn content(&self) -> String {
        if self.success {
            self.result
                .as_ref()
                .map(|v| serde_json::to_string(v).unwrap_or_default())
                .unwrap_or_else(|| "null".into())
        } else {
            format!("error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User context injection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Argument keys the dispatcher owns. Module- or LLM-supplied values under
/// these keys are overwritten, so a tool call can never act as another user.
pub const RESERVED_KEYS: [&str; 5] = [
    "user_id",
    "platform",
    "platform_channel_id",
    "platform_thread_id",
    "conversation_id",
];

/// Authoritative caller identity merged into every dispatched tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub platform: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    pub conversation_id: String,
}

impl UserContext {
    /// Merge the reserved keys into `arguments`, overwriting anything the
    /// caller put there.
    pub fn inject_into(&self, arguments: &mut serde_json::Map<String, Value>) {
        arguments.insert("user_id".into(), self.user_id.clone().into());
        arguments.insert("platform".into(), self.platform.clone().into());
        arguments.insert("platform_channel_id".into(), self.channel.clone().into());
        arguments.insert(
            "platform_thread_id".into(),
            self.thread.clone().map(Value::String).unwrap_or(Value::Null),
        );
        arguments.insert("conversation_id".into(), self.conversation_id.clone().into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors() {
        let m = ChatMessage::system("be helpful");
        assert_eq!(m.role, Role::System);
        assert!(m.tool_calls.is_none());

        let m = ChatMessage::tool_result("c1", "done");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn chat_message_roundtrip() {
        let m = ChatMessage::assistant_tool_calls(
            "",
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "research.web_search".into(),
                arguments: serde_json::json!({"query": "rust"}),
            }],
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls.unwrap()[0].tool_name, "research.web_search");
    }

    #[test]
    fn tool_result_content_success() {
        let r = ToolResult::ok("a.b", serde_json::json!({"n": 1}));
        assert_eq!(r.content(), "{\"n\":1}");
    }

    #[test]
    fn tool_result_content_error() {
        let r = ToolResult::err("a.b", "UnknownTool");
        assert_eq!(r.content(), "error: UnknownTool");
        assert!(!r.success);
    }

    #[test]
    fn tool_result_roundtrip() {
        let r = ToolResult::ok("research.web_search", serde_json::json!([1, 2, 3]));
        let json = serde_json::to_string(&r).unwrap();
        let back: ToolResult = serde_json::from_str(&json).unwrap();
        assert!(back.success);
        assert_eq!(back.result.unwrap(), serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn user_context_overwrites_reserved_keys() {
        let ctx = UserContext {
            user_id: "u1".into(),
            platform: "discord".into(),
            channel: "ch9".into(),
            thread: None,
            conversation_id: "conv5".into(),
        };
        let mut args = serde_json::Map::new();
        // A prompt-injected attempt to act as a different user.
        args.insert("user_id".into(), "admin".into());
        args.insert("query".into(), "hello".into());
        ctx.inject_into(&mut args);
        assert_eq!(args["user_id"], "u1");
        assert_eq!(args["platform"], "discord");
        assert_eq!(args["platform_thread_id"], Value::Null);
        assert_eq!(args["conversation_id"], "conv5");
        // Non-reserved keys survive.
        assert_eq!(args["query"], "hello");
    }

    #[test]
    fn reserved_keys_all_injected() {
        let ctx = UserContext {
            user_id: "u".into(),
            platform: "p".into(),
            channel: "c".into(),
            thread: Some("t".into()),
            conversation_id: "cv".into(),
        };
        let mut args = serde_json::Map::new();
        ctx.inject_into(&mut args);
        for key in RESERVED_KEYS {
            assert!(args.contains_key(key), "missing reserved key {key}");
        }
    }
}
