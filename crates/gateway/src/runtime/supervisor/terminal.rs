//! Interactive terminal sessions multiplexed over WebSocket.
//!
//! A session is a PTY opened inside the task's container. Reconnecting
//! with the same `session_id` attaches to the existing PTY and receives
//! only new output; sessions survive container restarts only while the
//! container ref is unchanged. At most 5 sessions per task; idle sessions
//! are swept after a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use swb_domain::error::{Error, Result};

use super::container::ContainerRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct TerminalSession {
    pub id: String,
    pub task_id: Uuid,
    pub container_ref: String,
    input: mpsc::Sender<String>,
    resize: mpsc::Sender<(u16, u16)>,
    output: broadcast::Sender<String>,
    last_activity: Mutex<Instant>,
}

impl TerminalSession {
    pub async fn send_input(&self, data: String) -> Result<()> {
        self.touch();
        self.input
            .send(data)
            .await
            .map_err(|_| Error::Http("terminal input channel closed".into()))
    }

    pub async fn send_resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.touch();
        self.resize
            .send((rows, cols))
            .await
            .map_err(|_| Error::Http("terminal resize channel closed".into()))
    }

    /// New-output-only subscription (no replay of bytes already sent).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.touch();
        self.output.subscribe()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TerminalManager {
    sessions: Mutex<HashMap<(Uuid, String), Arc<TerminalSession>>>,
    max_per_task: usize,
    idle_timeout: Duration,
}

impl TerminalManager {
    pub fn new(max_per_task: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_per_task: max_per_task.max(1),
            idle_timeout,
        }
    }

    /// Open a session or rejoin one by `session_id`.
    ///
    /// A stored session whose container ref no longer matches is discarded
    /// and replaced — the PTY died with the old container.
    pub async fn open_or_join(
        &self,
        runtime: &dyn ContainerRuntime,
        task_id: Uuid,
        session_id: &str,
        container_ref: &str,
        rows: u16,
        cols: u16,
    ) -> Result<Arc<TerminalSession>> {
        {
            let mut sessions = self.sessions.lock();
            if let Some(existing) = sessions.get(&(task_id, session_id.to_string())) {
                if existing.container_ref == container_ref {
                    existing.touch();
                    return Ok(existing.clone());
                }
                sessions.remove(&(task_id, session_id.to_string()));
            }
            let open_for_task = sessions.keys().filter(|(tid, _)| *tid == task_id).count();
            if open_for_task >= self.max_per_task {
                return Err(Error::validation(
                    "session_id",
                    format!("task already has {open_for_task} terminal sessions"),
                ));
            }
        }

        let shell = runtime.open_shell(container_ref, rows, cols).await?;
        let (output_tx, _) = broadcast::channel(256);

        // Pump shell output into the broadcast fan-out.
        let fanout = output_tx.clone();
        let mut shell_output = shell.output;
        tokio::spawn(async move {
            while let Some(chunk) = shell_output.recv().await {
                let _ = fanout.send(chunk);
            }
        });

        let session = Arc::new(TerminalSession {
            id: session_id.to_string(),
            task_id,
            container_ref: container_ref.to_string(),
            input: shell.input,
            resize: shell.resize,
            output: output_tx,
            last_activity: Mutex::new(Instant::now()),
        });
        self.sessions
            .lock()
            .insert((task_id, session_id.to_string()), session.clone());
        tracing::info!(task_id = %task_id, session_id = %session_id, "terminal session opened");
        Ok(session)
    }

    pub fn session_count(&self, task_id: &Uuid) -> usize {
        self.sessions
            .lock()
            .keys()
            .filter(|(tid, _)| tid == task_id)
            .count()
    }

    /// Close sessions idle beyond the timeout. Returns how many closed.
    pub fn sweep_idle(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|(task_id, session_id), session| {
            let keep = session.idle_for() < self.idle_timeout;
            if !keep {
                tracing::info!(
                    task_id = %task_id,
                    session_id = %session_id,
                    "closing idle terminal session"
                );
            }
            keep
        });
        before - sessions.len()
    }

    /// Drop every session attached to a task (container gone for good).
    pub fn close_for_task(&self, task_id: &Uuid) {
        self.sessions.lock().retain(|(tid, _), _| tid != task_id);
    }
}
