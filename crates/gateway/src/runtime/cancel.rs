//! Per-conversation cancellation tokens.
//!
//! Each running turn registers a [`CancelToken`] under its conversation id.
//! A new user message (or an explicit stop) cancels the in-flight turn;
//! in-flight tool calls observe the token and are aborted at the HTTP
//! layer.

use std::collections::HashMap;

use parking_lot::Mutex;
use swb_modules::CancelToken;

/// Tracks the active cancellation token per conversation.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a new cancel token for a conversation.
    pub fn register(&self, conversation_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(conversation_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a conversation. Returns true if a token
    /// was found.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(conversation_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Remove the token for a conversation (called when a turn completes).
    pub fn remove(&self, conversation_id: &str) {
        self.tokens.lock().remove(conversation_id);
    }

    /// Check if a conversation has an active (running) turn.
    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.tokens.lock().contains_key(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("c1");
        assert!(map.is_running("c1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("c1"));
        assert!(token.is_cancelled());

        map.remove("c1");
        assert!(!map.is_running("c1"));
        assert!(!map.cancel("c1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old_token = map.register("c1");
        let new_token = map.register("c1");
        map.cancel("c1");
        assert!(new_token.is_cancelled());
        // The orphaned token is unaffected.
        assert!(!old_token.is_cancelled());
    }

    #[test]
    fn cancel_nonexistent_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }
}
