//! Notification bus between the scheduler/supervisor and platform adapters.
//!
//! One logical channel per platform. Exactly one adapter consumes each
//! platform's channel; delivery is at-least-once, so adapters must be
//! idempotent under duplicates (conventionally keyed on `(kind, id)`).
//! Messages published before an adapter attaches are buffered up to the
//! channel capacity; beyond that they are dropped and counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use swb_domain::protocol::Notification;

pub struct NotificationBus {
    channels: Mutex<HashMap<String, PlatformChannel>>,
    capacity: usize,
    dropped: AtomicU64,
}

struct PlatformChannel {
    tx: mpsc::Sender<Notification>,
    /// Held until an adapter subscribes; `None` once taken.
    rx: Option<mpsc::Receiver<Notification>>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish a notification onto its platform channel. Never blocks: a
    /// full channel drops the message and bumps the drop counter.
    pub fn publish(&self, notification: Notification) {
        let tx = {
            let mut channels = self.channels.lock();
            let channel = channels
                .entry(notification.platform.clone())
                .or_insert_with(|| {
                    let (tx, rx) = mpsc::channel(self.capacity);
                    PlatformChannel { tx, rx: Some(rx) }
                });
            channel.tx.clone()
        };

        match tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    platform = %n.platform,
                    kind = ?n.kind,
                    "notification channel full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                tracing::warn!(platform = %n.platform, "notification channel closed");
            }
        }
    }

    /// Attach the (single) adapter for a platform. Returns `None` if the
    /// channel's consumer side was already taken.
    pub fn subscribe(&self, platform: &str) -> Option<mpsc::Receiver<Notification>> {
        let mut channels = self.channels.lock();
        let channel = channels.entry(platform.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.capacity);
            PlatformChannel { tx, rx: Some(rx) }
        });
        channel.rx.take()
    }

    /// Notifications dropped due to backpressure since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
