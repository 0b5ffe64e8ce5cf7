//! Scheduler worker — the process-wide ticker.
//!
//! Every tick it claims the active jobs whose `next_run_at` has passed,
//! evaluates them concurrently under a bounded semaphore, and commits each
//! job's attempts/status/next_run_at in one store update. Evaluation is
//! at-least-once across crashes; completions stay idempotent through the
//! job's terminal status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use swb_domain::protocol::{Notification, NotificationKind, NotificationType};

use super::eval::{self, Outcome};
use super::model::{CronConfig, JobStatus, JobType, OnComplete, ScheduledJob};
use super::{cron, placeholder};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SchedulerWorker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SchedulerWorker {
    semaphore: Arc<Semaphore>,
}

impl SchedulerWorker {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// One tick: claim due jobs and fan their evaluation out, bounded by
    /// the concurrency cap. Returns once every claimed job committed.
    pub async fn tick(&self, state: &AppState) {
        let now = Utc::now();
        let due = state.jobs.claim_due(now).await;
        if due.is_empty() {
            return;
        }
        tracing::debug!(due = due.len(), "scheduler tick");

        let mut handles = Vec::with_capacity(due.len());
        for job in due {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("scheduler semaphore never closed");
            let state = state.clone();
            let span =
                tracing::info_span!("job_eval", job_id = %job.id, job_type = ?job.job_type);
            handles.push(tokio::spawn(tracing::Instrument::instrument(
                async move {
                    let _permit = permit;
                    process_job(&state, job).await;
                },
                span,
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-job processing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn process_job(state: &AppState, job: ScheduledJob) {
    // Expiry is checked before spending an evaluation on the job.
    if let Some(expires_at) = job.expires_at {
        if Utc::now() >= expires_at {
            fail_job(state, &job, "expired before completing".into()).await;
            return;
        }
    }

    let outcome = eval::evaluate(state, &job).await;
    match outcome {
        Outcome::Met(result) => {
            if job.job_type == JobType::Cron {
                complete_cron_fire(state, &job, result).await;
            } else {
                complete_job(state, &job, result).await;
            }
        }
        Outcome::NotMet(last) => {
            let attempts = job.attempts + 1;
            if job.max_attempts.map(|max| attempts >= max).unwrap_or(false) {
                if let Some(updated) = state
                    .jobs
                    .update(&job.id, |j| {
                        j.attempts = attempts;
                        j.last_result = last.clone();
                    })
                    .await
                {
                    fail_job(
                        state,
                        &updated,
                        format!("gave up after {attempts} attempts"),
                    )
                    .await;
                }
                return;
            }
            let next = Utc::now() + chrono::Duration::seconds(job.interval_seconds.max(1) as i64);
            let _ = state
                .jobs
                .update(&job.id, |j| {
                    j.attempts = attempts;
                    j.consecutive_failures = 0;
                    j.last_result = last.clone();
                    j.next_run_at = Some(next);
                })
                .await;
        }
        Outcome::TransientError(error) => {
            let attempts = job.attempts + 1;
            let failures = job.consecutive_failures + 1;
            if job.max_attempts.map(|max| attempts >= max).unwrap_or(false) {
                if let Some(updated) = state
                    .jobs
                    .update(&job.id, |j| {
                        j.attempts = attempts;
                        j.consecutive_failures = failures;
                    })
                    .await
                {
                    fail_job(state, &updated, format!("gave up after {attempts} attempts: {error}"))
                        .await;
                }
                return;
            }
            let backoff = backoff_seconds(
                job.interval_seconds,
                failures,
                state.config.scheduler.backoff_cap_secs,
            );
            tracing::warn!(
                job_id = %job.id,
                failures,
                backoff_secs = backoff,
                error = %error,
                "transient job failure, backing off"
            );
            let next = Utc::now() + chrono::Duration::seconds(backoff as i64);
            let _ = state
                .jobs
                .update(&job.id, |j| {
                    j.attempts = attempts;
                    j.consecutive_failures = failures;
                    j.next_run_at = Some(next);
                })
                .await;
        }
        Outcome::PermanentError(error) => {
            let _ = state
                .jobs
                .update(&job.id, |j| {
                    j.attempts += 1;
                })
                .await;
            fail_job(state, &job, error).await;
        }
    }
}

/// Exponential backoff: `interval * 2^failures`, capped.
pub fn backoff_seconds(interval_seconds: u64, consecutive_failures: u32, cap: u64) -> u64 {
    let exp = consecutive_failures.min(20);
    interval_seconds
        .saturating_mul(1u64.checked_shl(exp).unwrap_or(u64::MAX))
        .min(cap)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Success paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn complete_job(state: &AppState, job: &ScheduledJob, result: serde_json::Value) {
    let updated = state
        .jobs
        .update(&job.id, |j| {
            j.attempts += 1;
            j.consecutive_failures = 0;
            j.runs_completed += 1;
            j.last_result = Some(result.clone());
            j.status = JobStatus::Completed;
            j.completed_at = Some(Utc::now());
            j.next_run_at = None;
        })
        .await;

    // A cancel racing this completion wins; dispatch only if we committed.
    if let Some(job) = updated {
        tracing::info!(job_id = %job.id, attempts = job.attempts, "job completed");
        dispatch_success(state, &job, Some(&result)).await;
    }
}

/// Cron jobs fire on every matching tick without terminating; the record
/// turns `Completed` only once `max_runs` is reached.
async fn complete_cron_fire(state: &AppState, job: &ScheduledJob, result: serde_json::Value) {
    let config: CronConfig = match serde_json::from_value(job.check_config.clone()) {
        Ok(c) => c,
        Err(e) => {
            fail_job(state, job, format!("invalid check_config: {e}")).await;
            return;
        }
    };
    let tz = match cron::parse_tz(&config.timezone) {
        Ok(tz) => tz,
        Err(e) => {
            fail_job(state, job, e.to_string()).await;
            return;
        }
    };

    let runs = job.runs_completed + 1;
    let done = job.max_runs.map(|max| runs >= max).unwrap_or(false);
    let next = cron::next_after(&config.cron_expr, &Utc::now(), tz);

    let updated = state
        .jobs
        .update(&job.id, |j| {
            j.runs_completed = runs;
            j.consecutive_failures = 0;
            j.last_result = Some(result.clone());
            if done || next.is_none() {
                j.status = JobStatus::Completed;
                j.completed_at = Some(Utc::now());
                j.next_run_at = None;
            } else {
                j.next_run_at = next;
            }
        })
        .await;

    if let Some(job) = updated {
        tracing::info!(job_id = %job.id, runs, done, "cron job fired");
        dispatch_success(state, &job, Some(&result)).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failure path & cascade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn fail_job(state: &AppState, job: &ScheduledJob, reason: String) {
    let failed = state
        .jobs
        .update(&job.id, |j| {
            j.status = JobStatus::Failed;
            j.status_message = Some(reason.clone());
            j.completed_at = Some(Utc::now());
            j.next_run_at = None;
        })
        .await;

    let Some(failed) = failed else {
        return; // already terminal (e.g. cancelled underneath us)
    };
    tracing::warn!(job_id = %failed.id, reason = %reason, "job failed");

    // Cascading cancellation: every active sibling transitions before the
    // failure notification leaves the process.
    if let Some(workflow_id) = failed.workflow_id {
        let cancel_reason = format!(
            "cancelled: job {} in the same workflow failed",
            failed
                .name
                .clone()
                .unwrap_or_else(|| failed.id.to_string())
        );
        let cancelled = state
            .jobs
            .cancel_workflow_siblings(workflow_id, &failed.id, &cancel_reason)
            .await;
        if !cancelled.is_empty() {
            tracing::info!(
                workflow_id = %workflow_id,
                cancelled = cancelled.len(),
                "cascading cancellation applied"
            );
        }
    }

    dispatch_failure(state, &failed, &reason).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn dispatch_success(state: &AppState, job: &ScheduledJob, result: Option<&serde_json::Value>) {
    let content = placeholder::render(
        &job.on_success_message,
        job,
        result,
        state.config.scheduler.result_render_limit,
    );
    match job.on_complete {
        OnComplete::Notify => notify(state, job, content, NotificationKind::JobSuccess),
        OnComplete::ResumeConversation => {
            crate::runtime::continuation::resume_or_notify(state, job, content).await;
        }
    }
}

async fn dispatch_failure(state: &AppState, job: &ScheduledJob, reason: &str) {
    let content = match &job.on_failure_message {
        Some(template) => placeholder::render(
            template,
            job,
            job.last_result.as_ref(),
            state.config.scheduler.result_render_limit,
        ),
        None => format!(
            "Job {} failed: {reason}",
            job.name.clone().unwrap_or_else(|| job.id.to_string())
        ),
    };
    notify(state, job, content, NotificationKind::JobFailure);
}

fn notify(state: &AppState, job: &ScheduledJob, content: String, kind: NotificationKind) {
    let pc = &job.platform_context;
    state.notifier.publish(Notification {
        message_type: NotificationType::Notification,
        platform: pc.platform.clone(),
        channel: pc.channel.clone(),
        thread: pc.thread.clone(),
        content,
        conversation_id: pc.conversation_id.clone(),
        kind,
        user_id: job.user_id.clone(),
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook firing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Time-windowed `(job_id, body-hash)` set so a retried webhook delivery
/// inside the replay window acks without re-firing.
pub struct WebhookDedupe {
    seen: Mutex<HashMap<(Uuid, [u8; 32]), Instant>>,
    window: Duration,
}

impl WebhookDedupe {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Returns `true` if this delivery is a replay within the window.
    pub fn check_and_insert(&self, job_id: Uuid, body_hash: [u8; 32]) -> bool {
        let mut map = self.seen.lock();
        let now = Instant::now();
        map.retain(|_, at| now.duration_since(*at) < self.window);
        if map.contains_key(&(job_id, body_hash)) {
            return true;
        }
        map.insert((job_id, body_hash), now);
        false
    }
}

/// Fire a webhook job exactly once with the decoded request body as its
/// result. Terminal jobs are left untouched (idempotent repeats).
pub async fn fire_webhook(state: &AppState, job: &ScheduledJob, body: serde_json::Value) -> bool {
    if job.status.is_terminal() {
        return false;
    }
    complete_job(state, job, body).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(10, 0, 300), 10);
        assert_eq!(backoff_seconds(10, 1, 300), 20);
        assert_eq!(backoff_seconds(10, 2, 300), 40);
        assert_eq!(backoff_seconds(10, 3, 300), 80);
        assert_eq!(backoff_seconds(10, 5, 300), 300, "capped at the ceiling");
        assert_eq!(backoff_seconds(10, 20, 300), 300);
    }

    #[test]
    fn backoff_survives_large_failure_counts() {
        assert_eq!(backoff_seconds(60, 63, 300), 300);
        assert_eq!(backoff_seconds(60, u32::MAX, 300), 300);
    }

    #[test]
    fn webhook_dedupe_replay_window() {
        let dedupe = WebhookDedupe::new(Duration::from_secs(5));
        let job_id = Uuid::new_v4();
        let hash = [7u8; 32];
        assert!(!dedupe.check_and_insert(job_id, hash));
        assert!(dedupe.check_and_insert(job_id, hash), "same delivery is a replay");

        // Different body or different job is not a replay.
        assert!(!dedupe.check_and_insert(job_id, [8u8; 32]));
        assert!(!dedupe.check_and_insert(Uuid::new_v4(), hash));
    }

    #[test]
    fn webhook_dedupe_expires() {
        let dedupe = WebhookDedupe::new(Duration::from_millis(0));
        let job_id = Uuid::new_v4();
        assert!(!dedupe.check_and_insert(job_id, [1u8; 32]));
        std::thread::sleep(Duration::from_millis(1));
        assert!(!dedupe.check_and_insert(job_id, [1u8; 32]));
    }
}
