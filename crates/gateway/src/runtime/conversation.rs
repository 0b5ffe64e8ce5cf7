//! Conversations and their append-only message transcripts.
//!
//! A conversation is addressed by `(platform, channel, thread?)` and owns a
//! totally ordered message list (monotonic `seq`). Tool-call records always
//! carry a matching tool-result record before the next assistant turn — the
//! agent loop appends them pairwise.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Address of a conversation on its platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub platform: String,
    pub channel: String,
    #[serde(default)]
    pub thread: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub key: ConversationKey,
    pub user_id: String,
    /// Exactly one active persona at a time (None = default behavior).
    #[serde(default)]
    pub persona_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserText,
    AssistantText,
    ToolCall,
    ToolResult,
    System,
}

/// One immutable transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub seq: u64,
    pub kind: MessageKind,
    pub content: String,
    /// Correlation id linking a tool_call record to its tool_result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Hidden records (synthesized continuations) are excluded from
    /// user-facing transcripts unless the persona requests them.
    #[serde(default)]
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
}

/// Input to [`ConversationStore::append`]; `seq` is assigned by the store.
pub struct NewMessage {
    pub kind: MessageKind,
    pub content: String,
    pub call_id: Option<String>,
    pub tool_name: Option<String>,
    pub hidden: bool,
}

impl NewMessage {
    pub fn text(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            call_id: None,
            tool_name: None,
            hidden: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    by_key: RwLock<HashMap<ConversationKey, String>>,
    messages: RwLock<HashMap<String, Vec<MessageRecord>>>,
    persist_path: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedConversations {
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<MessageRecord>>,
}

impl ConversationStore {
    pub fn new(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("conversations.json");
        let mut store = Self {
            conversations: RwLock::new(HashMap::new()),
            by_key: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            persist_path,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        if let Ok(data) = std::fs::read_to_string(&self.persist_path) {
            if let Ok(persisted) = serde_json::from_str::<PersistedConversations>(&data) {
                let mut by_key = HashMap::new();
                let mut conversations = HashMap::new();
                for c in persisted.conversations {
                    by_key.insert(c.key.clone(), c.id.clone());
                    conversations.insert(c.id.clone(), c);
                }
                tracing::info!(count = conversations.len(), "loaded conversations");
                self.conversations = RwLock::new(conversations);
                self.by_key = RwLock::new(by_key);
                self.messages = RwLock::new(persisted.messages);
            }
        }
    }

    async fn persist(&self) {
        let snapshot = PersistedConversations {
            conversations: self.conversations.read().await.values().cloned().collect(),
            messages: self.messages.read().await.clone(),
        };
        if let Ok(json) = serde_json::to_string(&snapshot) {
            let path = self.persist_path.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist conversations");
                }
            })
            .await;
        }
    }

    /// Resolve `(platform, channel, thread?)` to its conversation, creating
    /// one owned by `user_id` on first contact.
    pub async fn resolve_or_create(&self, key: &ConversationKey, user_id: &str) -> Conversation {
        if let Some(id) = self.by_key.read().await.get(key) {
            if let Some(c) = self.conversations.read().await.get(id) {
                return c.clone();
            }
        }
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            key: key.clone(),
            user_id: user_id.to_string(),
            persona_id: None,
            created_at: Utc::now(),
        };
        self.by_key
            .write()
            .await
            .insert(key.clone(), conversation.id.clone());
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        self.persist().await;
        tracing::debug!(conversation_id = %conversation.id, "created conversation");
        conversation
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    pub async fn set_persona(&self, conversation_id: &str, persona_id: Option<String>) -> bool {
        let updated = {
            let mut map = self.conversations.write().await;
            match map.get_mut(conversation_id) {
                Some(c) => {
                    c.persona_id = persona_id;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist().await;
        }
        updated
    }

    /// Append a message, assigning the next monotonic sequence number.
    pub async fn append(&self, conversation_id: &str, message: NewMessage) -> MessageRecord {
        let record = {
            let mut messages = self.messages.write().await;
            let list = messages.entry(conversation_id.to_string()).or_default();
            let record = MessageRecord {
                seq: list.last().map(|m| m.seq + 1).unwrap_or(0),
                kind: message.kind,
                content: message.content,
                call_id: message.call_id,
                tool_name: message.tool_name,
                hidden: message.hidden,
                created_at: Utc::now(),
            };
            list.push(record.clone());
            record
        };
        self.persist().await;
        record
    }

    /// The most recent `limit` messages in sequence order.
    pub async fn recent(&self, conversation_id: &str, limit: usize) -> Vec<MessageRecord> {
        let messages = self.messages.read().await;
        let list = match messages.get(conversation_id) {
            Some(list) => list,
            None => return Vec::new(),
        };
        let start = list.len().saturating_sub(limit);
        list[start..].to_vec()
    }

    /// Full transcript as shown to users: hidden records filtered unless
    /// requested.
    pub async fn transcript(&self, conversation_id: &str, include_hidden: bool) -> Vec<MessageRecord> {
        let messages = self.messages.read().await;
        messages
            .get(conversation_id)
            .map(|list| {
                list.iter()
                    .filter(|m| include_hidden || !m.hidden)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(thread: Option<&str>) -> ConversationKey {
        ConversationKey {
            platform: "discord".into(),
            channel: "ch1".into(),
            thread: thread.map(String::from),
        }
    }

    fn temp_store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn resolve_is_stable() {
        let (_dir, store) = temp_store();
        let a = store.resolve_or_create(&key(None), "u1").await;
        let b = store.resolve_or_create(&key(None), "u1").await;
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn threads_are_distinct_conversations() {
        let (_dir, store) = temp_store();
        let a = store.resolve_or_create(&key(None), "u1").await;
        let b = store.resolve_or_create(&key(Some("t1")), "u1").await;
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn append_assigns_monotonic_seq() {
        let (_dir, store) = temp_store();
        let c = store.resolve_or_create(&key(None), "u1").await;
        for i in 0..5 {
            let r = store
                .append(&c.id, NewMessage::text(MessageKind::UserText, format!("m{i}")))
                .await;
            assert_eq!(r.seq, i as u64);
        }
        let recent = store.recent(&c.id, 3).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].seq, 2);
        assert_eq!(recent[2].seq, 4);
    }

    #[tokio::test]
    async fn tool_pairs_preserved_in_order() {
        let (_dir, store) = temp_store();
        let c = store.resolve_or_create(&key(None), "u1").await;
        store
            .append(
                &c.id,
                NewMessage {
                    kind: MessageKind::ToolCall,
                    content: "{}".into(),
                    call_id: Some("c1".into()),
                    tool_name: Some("research.web_search".into()),
                    hidden: false,
                },
            )
            .await;
        store
            .append(
                &c.id,
                NewMessage {
                    kind: MessageKind::ToolResult,
                    content: "[]".into(),
                    call_id: Some("c1".into()),
                    tool_name: Some("research.web_search".into()),
                    hidden: false,
                },
            )
            .await;
        let all = store.recent(&c.id, 10).await;
        assert_eq!(all[0].kind, MessageKind::ToolCall);
        assert_eq!(all[1].kind, MessageKind::ToolResult);
        assert_eq!(all[0].call_id, all[1].call_id);
    }

    #[tokio::test]
    async fn transcript_hides_hidden_records() {
        let (_dir, store) = temp_store();
        let c = store.resolve_or_create(&key(None), "u1").await;
        store
            .append(
                &c.id,
                NewMessage {
                    kind: MessageKind::UserText,
                    content: "synthesized".into(),
                    call_id: None,
                    tool_name: None,
                    hidden: true,
                },
            )
            .await;
        store
            .append(&c.id, NewMessage::text(MessageKind::AssistantText, "visible"))
            .await;

        assert_eq!(store.transcript(&c.id, false).await.len(), 1);
        assert_eq!(store.transcript(&c.id, true).await.len(), 2);
    }

    #[tokio::test]
    async fn conversations_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = ConversationStore::new(dir.path());
            let c = store.resolve_or_create(&key(None), "u1").await;
            store
                .append(&c.id, NewMessage::text(MessageKind::UserText, "hello"))
                .await;
            c.id
        };
        let store = ConversationStore::new(dir.path());
        let c = store.get(&id).await.unwrap();
        assert_eq!(c.user_id, "u1");
        assert_eq!(store.recent(&id, 10).await.len(), 1);
    }
}
