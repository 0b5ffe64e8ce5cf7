//! Task log storage and live fan-out.
//!
//! The append-only log file (one per task, offsets counted in lines) is the
//! durable ground truth; the broadcast channel is its live mirror. Slow
//! subscribers lag and lose the oldest entries — the drop count is
//! observable via [`LogStore::dropped_count`].

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use swb_domain::protocol::LogStreamFrame;

pub struct LogStore {
    dir: PathBuf,
    channels: Mutex<HashMap<Uuid, broadcast::Sender<LogStreamFrame>>>,
    offsets: Mutex<HashMap<Uuid, u64>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl LogStore {
    pub fn new(state_path: &std::path::Path, capacity: usize) -> Self {
        Self {
            dir: state_path.join("task-logs"),
            channels: Mutex::new(HashMap::new()),
            offsets: Mutex::new(HashMap::new()),
            capacity: capacity.max(8),
            dropped: AtomicU64::new(0),
        }
    }

    fn log_path(&self, task_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{task_id}.log"))
    }

    fn sender(&self, task_id: &Uuid) -> broadcast::Sender<LogStreamFrame> {
        self.channels
            .lock()
            .entry(*task_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    // ── Writing ────────────────────────────────────────────────────

    /// Append one line to the task's log file and mirror it to live
    /// subscribers. Returns the line's offset.
    pub fn append_line(&self, task_id: &Uuid, line: &str) -> u64 {
        let offset = {
            let mut offsets = self.offsets.lock();
            let offset = offsets.entry(*task_id).or_insert_with(|| {
                // First touch: recover the offset from the file on disk.
                self.count_lines(task_id)
            });
            let current = *offset;
            *offset += 1;
            current
        };

        let path = self.log_path(task_id);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::warn!(task_id = %task_id, error = %e, "log append failed");
                }
            }
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "log open failed"),
        }

        let _ = self.sender(task_id).send(LogStreamFrame::LogLines {
            lines: vec![line.to_string()],
            offset,
        });
        offset
    }

    /// Mirror a task state transition to live subscribers.
    pub fn notify_status(&self, task_id: &Uuid, status: &str) {
        let _ = self.sender(task_id).send(LogStreamFrame::StatusChange {
            status: status.to_string(),
        });
    }

    // ── Reading ────────────────────────────────────────────────────

    fn count_lines(&self, task_id: &Uuid) -> u64 {
        std::fs::read_to_string(self.log_path(task_id))
            .map(|s| s.lines().count() as u64)
            .unwrap_or(0)
    }

    /// Total lines written for a task.
    pub fn line_count(&self, task_id: &Uuid) -> u64 {
        if let Some(offset) = self.offsets.lock().get(task_id) {
            return *offset;
        }
        self.count_lines(task_id)
    }

    /// Historical read: `tail` lines starting at `offset` (line index).
    pub fn tail(&self, task_id: &Uuid, offset: u64, limit: usize) -> Vec<String> {
        let content = match std::fs::read_to_string(self.log_path(task_id)) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        content
            .lines()
            .skip(offset as usize)
            .take(limit)
            .map(String::from)
            .collect()
    }

    /// The last `n` lines.
    pub fn last(&self, task_id: &Uuid, n: usize) -> Vec<String> {
        let total = self.line_count(task_id) as usize;
        self.tail(task_id, total.saturating_sub(n) as u64, n)
    }

    /// Live subscription; pair with [`Self::tail`] for replay-from-offset.
    pub fn subscribe(&self, task_id: &Uuid) -> broadcast::Receiver<LogStreamFrame> {
        self.sender(task_id).subscribe()
    }

    /// Record frames lost by a lagging subscriber.
    pub fn record_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drop the live channel for a finished task.
    pub fn cleanup_channel(&self, task_id: &Uuid) {
        self.channels.lock().remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path(), 64);
        (dir, store)
    }

    #[test]
    fn append_assigns_line_offsets() {
        let (_dir, store) = store();
        let task_id = Uuid::new_v4();
        assert_eq!(store.append_line(&task_id, "one"), 0);
        assert_eq!(store.append_line(&task_id, "two"), 1);
        assert_eq!(store.append_line(&task_id, "three"), 2);
        assert_eq!(store.line_count(&task_id), 3);
    }

    #[test]
    fn tail_returns_bounded_slice() {
        let (_dir, store) = store();
        let task_id = Uuid::new_v4();
        for i in 0..10 {
            store.append_line(&task_id, &format!("line-{i}"));
        }
        let slice = store.tail(&task_id, 4, 3);
        assert_eq!(slice, vec!["line-4", "line-5", "line-6"]);
        assert_eq!(store.last(&task_id, 2), vec!["line-8", "line-9"]);
        assert!(store.tail(&task_id, 100, 5).is_empty());
    }

    #[test]
    fn offset_recovered_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = Uuid::new_v4();
        {
            let store = LogStore::new(dir.path(), 64);
            store.append_line(&task_id, "before restart");
        }
        let store = LogStore::new(dir.path(), 64);
        assert_eq!(store.append_line(&task_id, "after restart"), 1);
        assert_eq!(
            store.tail(&task_id, 0, 10),
            vec!["before restart", "after restart"]
        );
    }

    #[tokio::test]
    async fn subscribers_receive_live_frames() {
        let (_dir, store) = store();
        let task_id = Uuid::new_v4();
        let mut rx = store.subscribe(&task_id);

        store.append_line(&task_id, "hello");
        store.notify_status(&task_id, "running");

        match rx.recv().await.unwrap() {
            LogStreamFrame::LogLines { lines, offset } => {
                assert_eq!(lines, vec!["hello"]);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected frame {other:?}"),
        }
        match rx.recv().await.unwrap() {
            LogStreamFrame::StatusChange { status } => assert_eq!(status, "running"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn dropped_counter_accumulates() {
        let (_dir, store) = store();
        store.record_dropped(3);
        store.record_dropped(2);
        assert_eq!(store.dropped_count(), 5);
    }
}
