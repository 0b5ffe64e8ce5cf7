//! Per-conversation concurrency control.
//!
//! Concurrent turns on one conversation are serialized FIFO by message
//! arrival; different conversations run truly in parallel. Each
//! conversation id maps to a `Semaphore(1)` whose permit is held for the
//! duration of a turn.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ConversationLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for ConversationLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn lock for a conversation. Waiters are served in
    /// arrival order (tokio semaphores are FIFO). The permit auto-releases
    /// on drop.
    pub async fn acquire(&self, conversation_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(conversation_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("conversation semaphore never closed")
    }

    /// Number of tracked conversations (for monitoring).
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop locks for conversations that aren't actively held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_access() {
        let map = ConversationLockMap::new();
        let p1 = map.acquire("c1").await;
        drop(p1);
        let p2 = map.acquire("c1").await;
        drop(p2);
    }

    #[tokio::test]
    async fn different_conversations_concurrent() {
        let map = Arc::new(ConversationLockMap::new());
        let _p1 = map.acquire("c1").await;
        let _p2 = map.acquire("c2").await;
        assert_eq!(map.lock_count(), 2);
    }

    #[tokio::test]
    async fn same_conversation_waits() {
        let map = Arc::new(ConversationLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("c1").await;
        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("c1").await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(p1);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = ConversationLockMap::new();
        let _held = map.acquire("busy").await;
        {
            let released = map.acquire("idle").await;
            drop(released);
        }
        map.prune_idle();
        assert_eq!(map.lock_count(), 1);
    }
}
