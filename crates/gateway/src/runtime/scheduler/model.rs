//! Scheduled job data model — job records, typed check configs, operators.
//!
//! `check_config` stays an opaque JSON blob on the persisted record; the
//! worker parses it into the typed config for the job's `job_type` at
//! validation and evaluation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PollModule,
    Delay,
    PollUrl,
    Cron,
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnComplete {
    Notify,
    ResumeConversation,
}

impl Default for OnComplete {
    fn default() -> Self {
        Self::Notify
    }
}

/// Comparison operators for condition evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    In,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Default for Operator {
    fn default() -> Self {
        Self::In
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Platform context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where completion messages go back to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformContext {
    pub platform: String,
    pub channel: String,
    #[serde(default)]
    pub thread: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub user_id: String,
    /// Opaque grouping key for workflow semantics, not a foreign key.
    #[serde(default)]
    pub workflow_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub job_type: JobType,
    /// Opaque to the store; parsed per `job_type` at evaluation time.
    pub check_config: Value,
    pub interval_seconds: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Cron only: total fires before the job terminates.
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub runs_completed: u32,
    pub status: JobStatus,
    /// Invariant: `status == Active` implies `next_run_at` is set.
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<Value>,
    pub on_success_message: String,
    #[serde(default)]
    pub on_failure_message: Option<String>,
    #[serde(default)]
    pub on_complete: OnComplete,
    pub platform_context: PlatformContext,
    /// Projection of `{result}` down to these top-level fields, when set.
    #[serde(default)]
    pub result_summary_fields: Option<Vec<String>>,
    /// Deterministic system message recorded on failure or cascade-cancel.
    #[serde(default)]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Derived from a workflow's jobs: active beats failed beats cancelled
/// beats completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

pub fn derive_workflow_status(jobs: &[&ScheduledJob]) -> WorkflowStatus {
    if jobs.iter().any(|j| j.status == JobStatus::Active) {
        WorkflowStatus::Active
    } else if jobs.iter().any(|j| j.status == JobStatus::Failed) {
        WorkflowStatus::Failed
    } else if jobs.iter().any(|j| j.status == JobStatus::Cancelled) {
        WorkflowStatus::Cancelled
    } else {
        WorkflowStatus::Completed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Typed check configs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct PollModuleConfig {
    /// Fully qualified tool name (`module.op`).
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    /// Dot path read from the tool result.
    pub success_field: String,
    #[serde(default)]
    pub success_value: Option<Value>,
    #[serde(default)]
    pub success_values: Option<Vec<Value>>,
    #[serde(default)]
    pub success_operator: Operator,
}

fn d_method() -> String {
    "GET".into()
}

fn d_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollUrlConfig {
    pub url: String,
    #[serde(default = "d_method")]
    pub method: String,
    #[serde(default = "d_expected_status")]
    pub expected_status: u16,
    #[serde(default)]
    pub response_field: Option<String>,
    #[serde(default)]
    pub response_value: Option<Value>,
    #[serde(default)]
    pub response_values: Option<Vec<Value>>,
    #[serde(default)]
    pub response_operator: Operator,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    pub delay_seconds: u64,
}

fn d_timezone() -> String {
    "UTC".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    pub cron_expr: String,
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
}

/// Sentinel `next_run_at` for webhook jobs: far enough out that the ticker
/// never selects them (they fire only via the HTTP endpoint).
pub fn webhook_sentinel() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(365 * 100)
}

/// Bare job record for scheduler tests.
#[cfg(test)]
pub(crate) fn test_job(job_type: JobType, status: JobStatus) -> ScheduledJob {
    ScheduledJob {
        id: Uuid::new_v4(),
        user_id: "u1".into(),
        workflow_id: None,
        name: None,
        description: None,
        job_type,
        check_config: serde_json::json!({}),
        interval_seconds: 60,
        max_attempts: None,
        max_runs: None,
        expires_at: None,
        attempts: 0,
        consecutive_failures: 0,
        runs_completed: 0,
        status,
        next_run_at: Some(Utc::now()),
        last_result: None,
        on_success_message: "done".into(),
        on_failure_message: None,
        on_complete: OnComplete::Notify,
        platform_context: PlatformContext::default(),
        result_summary_fields: None,
        status_message: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}
