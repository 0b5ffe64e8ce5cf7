//! Wire frames for the gateway's WebSocket endpoints and the notification
//! channel payload shared with platform adapters.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal session frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client → server frames on `/api/tasks/{id}/terminal/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalClientFrame {
    Input { data: String },
    Resize { rows: u16, cols: u16 },
}

/// Server → client frames on the terminal socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalServerFrame {
    Ready,
    Output { data: String },
    Error { message: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log stream frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Server → client frames on `/api/tasks/{id}/logs/ws`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogStreamFrame {
    /// A batch of new log lines; `offset` is the line offset of the first.
    LogLines { lines: Vec<String>, offset: u64 },
    /// The task transitioned state.
    StatusChange { status: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notification payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    JobSuccess,
    JobFailure,
    TaskStatus,
}

/// Message on the `notifications:{platform}` channel. Delivery is
/// at-least-once; adapters dedupe on `(kind, source id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub message_type: NotificationType,
    pub platform: String,
    pub channel: String,
    #[serde(default)]
    pub thread: Option<String>,
    pub content: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub kind: NotificationKind,
    /// Owning user, used by adapters for per-user delivery rules.
    pub user_id: String,
}

/// Constant discriminator so the payload is self-describing on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Notification,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        platform: impl Into<String>,
        channel: impl Into<String>,
        content: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            message_type: NotificationType::Notification,
            platform: platform.into(),
            channel: channel.into(),
            thread: None,
            content: content.into(),
            conversation_id: None,
            kind,
            user_id: user_id.into(),
        }
    }
}
