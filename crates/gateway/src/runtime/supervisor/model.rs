//! Long-running task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::super::scheduler::model::PlatformContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    /// Semi-terminal: the container may be gone but the workspace persists;
    /// only a `continue_task` child escapes this state.
    AwaitingInput,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::AwaitingInput => "awaiting_input",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Produce a plan and pause for approval.
    Plan,
    /// Carry the work out.
    Execute,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub owner_user_id: String,
    pub prompt: String,
    pub workspace_path: std::path::PathBuf,
    pub status: TaskStatus,
    pub mode: TaskMode,
    /// Continuation chain; forms a DAG (each task has at most one parent).
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    pub heartbeat_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub container_ref: Option<String>,
    /// Lines written to the task's log file so far.
    #[serde(default)]
    pub log_offset: u64,
    #[serde(default)]
    pub exit_code: Option<i64>,
    pub timeout_seconds: u64,
    pub platform_context: PlatformContext,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        owner_user_id: impl Into<String>,
        prompt: impl Into<String>,
        workspace_path: std::path::PathBuf,
        mode: TaskMode,
        timeout_seconds: u64,
        platform_context: PlatformContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_user_id: owner_user_id.into(),
            prompt: prompt.into(),
            workspace_path,
            status: TaskStatus::Queued,
            mode,
            parent_task_id: None,
            heartbeat_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            container_ref: None,
            log_offset: 0,
            exit_code: None,
            timeout_seconds,
            platform_context,
            created_at: Utc::now(),
        }
    }
}
