//! Task lifecycle supervision.
//!
//! `start_task` creates the record and workspace, then a supervisor task
//! drives the container: start → running → (plan done ⇒ awaiting_input |
//! execute done ⇒ completed/failed), with a heartbeat probe that declares
//! the task `timed_out` when the container stops answering or the
//! wall-clock budget runs out.

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use uuid::Uuid;

use swb_domain::error::{Error, Result};
use swb_domain::protocol::{Notification, NotificationKind, NotificationType};

use super::container::ContainerSpec;
use super::model::{TaskMode, TaskRecord, TaskStatus};
use crate::runtime::scheduler::model::PlatformContext;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Starting tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StartTaskArgs {
    pub prompt: String,
    pub mode: TaskMode,
    pub timeout_seconds: Option<u64>,
}

/// Create a queued task with a fresh workspace and spawn its supervisor.
pub async fn start_task(
    state: &AppState,
    owner_user_id: &str,
    platform_context: PlatformContext,
    args: StartTaskArgs,
) -> Result<TaskRecord> {
    let timeout = args
        .timeout_seconds
        .unwrap_or(state.config.supervisor.default_timeout_secs);
    let mut task = TaskRecord::new(
        owner_user_id,
        args.prompt,
        std::path::PathBuf::new(),
        args.mode,
        timeout,
        platform_context,
    );
    task.workspace_path = state
        .config
        .supervisor
        .workspace_root
        .join(task.id.to_string());
    std::fs::create_dir_all(&task.workspace_path)
        .map_err(|e| Error::Fatal(format!("cannot create workspace: {e}")))?;

    let task = state.tasks.insert(task).await;
    spawn_supervisor(state.clone(), task.id);
    Ok(task)
}

/// Create a child task continuing a prior one: same workspace, fresh
/// container, `parent_task_id` pointing at the predecessor.
pub async fn continue_task(
    state: &AppState,
    owner_user_id: &str,
    parent_id: Uuid,
    prompt: Option<String>,
    mode: TaskMode,
) -> Result<TaskRecord> {
    let parent = state
        .tasks
        .get(&parent_id)
        .ok_or_else(|| Error::Permanent(format!("task {parent_id} not found")))?;
    if parent.owner_user_id != owner_user_id {
        return Err(Error::Permission("you do not own this task".into()));
    }
    match parent.status {
        TaskStatus::AwaitingInput | TaskStatus::Completed | TaskStatus::Failed
        | TaskStatus::TimedOut => {}
        other => {
            return Err(Error::validation(
                "task_id",
                format!("cannot continue a task in status {other:?}"),
            ));
        }
    }

    let mut task = TaskRecord::new(
        owner_user_id,
        prompt.unwrap_or_else(|| parent.prompt.clone()),
        parent.workspace_path.clone(),
        mode,
        parent.timeout_seconds,
        parent.platform_context.clone(),
    );
    task.parent_task_id = Some(parent.id);

    let task = state.tasks.insert(task).await;
    spawn_supervisor(state.clone(), task.id);
    Ok(task)
}

/// Cancel a task: terminal transition first, then best-effort container
/// kill. Logs are preserved.
pub async fn cancel_task(state: &AppState, task_id: &Uuid) -> Result<TaskRecord> {
    let cancelled = state
        .tasks
        .transition(task_id, TaskStatus::Cancelled)
        .await
        .ok_or_else(|| {
            Error::validation("task_id", "task is already in a terminal state or unknown")
        })?;
    state.logs.notify_status(task_id, TaskStatus::Cancelled.as_str());
    if let Some(container_ref) = &cancelled.container_ref {
        if let Err(e) = state.containers.kill(container_ref).await {
            tracing::warn!(task_id = %task_id, error = %e, "container kill failed on cancel");
        }
    }
    publish_status(state, &cancelled);
    Ok(cancelled)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervision loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn spawn_supervisor(state: AppState, task_id: Uuid) {
    let span = tracing::info_span!("task_supervisor", %task_id);
    tokio::spawn(tracing::Instrument::instrument(
        async move {
            supervise(state, task_id).await;
        },
        span,
    ));
}

async fn supervise(state: AppState, task_id: Uuid) {
    let Some(task) = state.tasks.get(&task_id) else {
        return;
    };

    // ── Container start ──────────────────────────────────────────
    let spec = ContainerSpec {
        name: format!("swb-task-{task_id}"),
        image: state.config.supervisor.image.clone(),
        workspace_path: task.workspace_path.clone(),
        command: Vec::new(),
        env: vec![
            ("TASK_ID".into(), task_id.to_string()),
            ("TASK_PROMPT".into(), task.prompt.clone()),
            (
                "TASK_MODE".into(),
                match task.mode {
                    TaskMode::Plan => "plan".into(),
                    TaskMode::Execute => "execute".into(),
                },
            ),
        ],
    };

    let container_ref = match state.containers.start(&spec).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "container start failed");
            if let Some(failed) = state.tasks.transition(&task_id, TaskStatus::Failed).await {
                let _ = state
                    .tasks
                    .update(&task_id, |t| {
                        t.error = Some(format!("container start failed: {e}"));
                    })
                    .await;
                state.logs.notify_status(&task_id, TaskStatus::Failed.as_str());
                publish_status(&state, &failed);
            }
            return;
        }
    };

    let _ = state
        .tasks
        .update(&task_id, |t| {
            t.container_ref = Some(container_ref.clone());
            t.heartbeat_at = Utc::now();
        })
        .await;
    if state.tasks.transition(&task_id, TaskStatus::Running).await.is_none() {
        // Cancelled while queued: tear the container back down.
        let _ = state.containers.kill(&container_ref).await;
        let _ = state.containers.remove(&container_ref).await;
        return;
    }
    state.logs.notify_status(&task_id, TaskStatus::Running.as_str());

    // ── Log pump ─────────────────────────────────────────────────
    if let Ok(mut lines) = state.containers.follow_logs(&container_ref).await {
        let log_state = state.clone();
        tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                log_state.logs.append_line(&task_id, &line);
            }
        });
    }

    // ── Heartbeat / liveness loop ────────────────────────────────
    let period = Duration::from_secs(state.config.supervisor.heartbeat_secs.max(1));
    let heartbeat_timeout =
        chrono::Duration::seconds(state.config.supervisor.heartbeat_timeout_secs as i64);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(current) = state.tasks.get(&task_id) else {
            return;
        };
        if current.status.is_terminal() {
            // Cancelled externally; the container was already killed.
            break;
        }

        // Wall-clock budget.
        let started = current.started_at.unwrap_or(current.created_at);
        if Utc::now() >= started + chrono::Duration::seconds(current.timeout_seconds as i64) {
            tracing::warn!(timeout_seconds = current.timeout_seconds, "task wall clock exceeded");
            time_out(&state, &task_id, &container_ref).await;
            break;
        }

        match state.containers.inspect(&container_ref).await {
            Ok(container_state) => {
                let _ = state
                    .tasks
                    .update(&task_id, |t| {
                        t.heartbeat_at = Utc::now();
                    })
                    .await;
                if !container_state.running {
                    finalize(&state, &task_id, container_state.exit_code).await;
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "container probe failed");
                if Utc::now() - current.heartbeat_at > heartbeat_timeout {
                    tracing::warn!("heartbeat timeout, declaring task dead");
                    time_out(&state, &task_id, &container_ref).await;
                    break;
                }
            }
        }
    }

    let _ = state.containers.remove(&container_ref).await;
}

async fn time_out(state: &AppState, task_id: &Uuid, container_ref: &str) {
    let _ = state.containers.kill(container_ref).await;
    if let Some(task) = state.tasks.transition(task_id, TaskStatus::TimedOut).await {
        let _ = state
            .tasks
            .update(task_id, |t| {
                t.error = Some("heartbeat or wall-clock timeout".into());
                t.log_offset = state.logs.line_count(task_id);
            })
            .await;
        state.logs.notify_status(task_id, TaskStatus::TimedOut.as_str());
        publish_status(state, &task);
    }
}

/// The container exited on its own: map `(mode, exit_code)` to the final
/// status. Plan-mode success pauses for approval instead of completing.
async fn finalize(state: &AppState, task_id: &Uuid, exit_code: Option<i64>) {
    let Some(task) = state.tasks.get(task_id) else {
        return;
    };
    let status = match (task.mode, exit_code) {
        (TaskMode::Plan, Some(0)) => TaskStatus::AwaitingInput,
        (_, Some(0)) => TaskStatus::Completed,
        _ => TaskStatus::Failed,
    };

    let transitioned = state.tasks.transition(task_id, status).await;
    if transitioned.is_none() {
        return; // lost the race against an external cancel
    }
    let updated = state
        .tasks
        .update(task_id, |t| {
            t.exit_code = exit_code;
            t.log_offset = state.logs.line_count(task_id);
            let tail = state.logs.last(task_id, 20);
            if !tail.is_empty() {
                t.result = Some(tail.join("\n"));
            }
            if status == TaskStatus::Failed {
                t.error = Some(format!(
                    "container exited with code {}",
                    exit_code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
                ));
            }
        })
        .await;

    state.logs.notify_status(task_id, status.as_str());
    if let Some(task) = updated {
        tracing::info!(status = status.as_str(), exit_code, "task finished");
        publish_status(state, &task);
    }
}

fn publish_status(state: &AppState, task: &TaskRecord) {
    let pc = &task.platform_context;
    if pc.platform.is_empty() {
        return;
    }
    state.notifier.publish(Notification {
        message_type: NotificationType::Notification,
        platform: pc.platform.clone(),
        channel: pc.channel.clone(),
        thread: pc.thread.clone(),
        content: format!(
            "Task {} is {}{}",
            task.id,
            task.status.as_str(),
            task.error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ),
        conversation_id: pc.conversation_id.clone(),
        kind: NotificationKind::TaskStatus,
        user_id: task.owner_user_id.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    fn platform_context() -> PlatformContext {
        PlatformContext {
            platform: "discord".into(),
            channel: "ch1".into(),
            thread: None,
            conversation_id: None,
        }
    }

    async fn wait_for_status(
        state: &AppState,
        task_id: &Uuid,
        status: TaskStatus,
        timeout: Duration,
    ) -> TaskRecord {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let task = state.tasks.get(task_id).unwrap();
            if task.status == status {
                return task;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "task never reached {status:?}, stuck at {:?}",
                task.status
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[tokio::test]
    async fn execute_task_completes_on_exit_zero() {
        let (env, state) = test_state();
        env.containers.script_logs(vec!["building".into(), "done".into()]);

        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "build it".into(),
                mode: TaskMode::Execute,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();

        let running = wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;
        let container_ref = running.container_ref.unwrap();
        env.containers.finish(&container_ref, 0);

        let done = wait_for_status(&state, &task.id, TaskStatus::Completed, Duration::from_secs(5)).await;
        assert_eq!(done.exit_code, Some(0));
        assert!(done.finished_at.is_some());
        assert_eq!(done.log_offset, 2);
        assert!(done.result.unwrap().contains("done"));
    }

    #[tokio::test]
    async fn plan_task_pauses_awaiting_input() {
        let (env, state) = test_state();
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "plan it".into(),
                mode: TaskMode::Plan,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();

        let running = wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;
        env.containers.finish(&running.container_ref.unwrap(), 0);
        wait_for_status(&state, &task.id, TaskStatus::AwaitingInput, Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn nonzero_exit_fails_task() {
        let (env, state) = test_state();
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "break it".into(),
                mode: TaskMode::Execute,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();

        let running = wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;
        env.containers.finish(&running.container_ref.unwrap(), 2);

        let failed = wait_for_status(&state, &task.id, TaskStatus::Failed, Duration::from_secs(5)).await;
        assert_eq!(failed.exit_code, Some(2));
        assert!(failed.error.unwrap().contains("exited with code 2"));
    }

    #[tokio::test]
    async fn container_start_failure_fails_task() {
        let (env, state) = test_state();
        env.containers.fail_next_start(true);

        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "doomed".into(),
                mode: TaskMode::Execute,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();

        let failed = wait_for_status(&state, &task.id, TaskStatus::Failed, Duration::from_secs(5)).await;
        assert!(failed.error.unwrap().contains("container start failed"));
    }

    #[tokio::test]
    async fn wall_clock_timeout_kills_task() {
        let (_env, state) = test_state();
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "slow".into(),
                mode: TaskMode::Execute,
                timeout_seconds: Some(0),
            },
        )
        .await
        .unwrap();

        let timed_out =
            wait_for_status(&state, &task.id, TaskStatus::TimedOut, Duration::from_secs(5)).await;
        assert!(timed_out.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn continue_task_chains_from_awaiting_input() {
        let (env, state) = test_state();
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "plan".into(),
                mode: TaskMode::Plan,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();
        let running = wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;
        env.containers.finish(&running.container_ref.unwrap(), 0);
        wait_for_status(&state, &task.id, TaskStatus::AwaitingInput, Duration::from_secs(5)).await;

        let child = continue_task(&state, "u1", task.id, None, TaskMode::Execute)
            .await
            .unwrap();
        assert_eq!(child.parent_task_id, Some(task.id));
        assert_eq!(child.workspace_path, task.workspace_path);

        let chain = state.tasks.chain(&child.id);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, task.id);
    }

    #[tokio::test]
    async fn continue_task_rejects_running_parent() {
        let (_env, state) = test_state();
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "busy".into(),
                mode: TaskMode::Execute,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();
        wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;

        let err = continue_task(&state, "u1", task.id, None, TaskMode::Execute)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot continue"));
    }

    #[tokio::test]
    async fn continue_task_checks_ownership() {
        let (env, state) = test_state();
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "mine".into(),
                mode: TaskMode::Plan,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();
        let running = wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;
        env.containers.finish(&running.container_ref.unwrap(), 0);
        wait_for_status(&state, &task.id, TaskStatus::AwaitingInput, Duration::from_secs(5)).await;

        let err = continue_task(&state, "intruder", task.id, None, TaskMode::Execute)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
    }

    #[tokio::test]
    async fn cancel_preserves_logs() {
        let (env, state) = test_state();
        env.containers.script_logs(vec!["work in progress".into()]);
        let task = start_task(
            &state,
            "u1",
            platform_context(),
            StartTaskArgs {
                prompt: "cancel me".into(),
                mode: TaskMode::Execute,
                timeout_seconds: Some(30),
            },
        )
        .await
        .unwrap();
        wait_for_status(&state, &task.id, TaskStatus::Running, Duration::from_secs(3)).await;
        // Give the log pump a moment.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let cancelled = cancel_task(&state, &task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(state.logs.tail(&task.id, 0, 10), vec!["work in progress"]);

        // Terminal-once: a later container exit cannot overwrite Cancelled.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(state.tasks.get(&task.id).unwrap().status, TaskStatus::Cancelled);
    }
}
