//! Memory recall hook for context building.
//!
//! Long-term memory lives in an external service; the agent loop only
//! needs a way to ask for snippets relevant to the current message. The
//! default implementation recalls nothing.

use async_trait::async_trait;

/// Supplies memory snippets folded into the system prompt.
#[async_trait]
pub trait RecallProvider: Send + Sync {
    /// Return up to `limit` snippets relevant to `query` for `user_id`.
    async fn recall(&self, user_id: &str, query: &str, limit: usize) -> Vec<String>;
}

/// Recalls nothing; used when no memory service is configured.
pub struct NoopRecall;

#[async_trait]
impl RecallProvider for NoopRecall {
    async fn recall(&self, _user_id: &str, _query: &str, _limit: usize) -> Vec<String> {
        Vec::new()
    }
}
