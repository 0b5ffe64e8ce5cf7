//! Continuation gateway — re-enters the agent loop from a completed
//! scheduler job.
//!
//! The rendered success message is synthesized as a hidden user message in
//! the job's conversation, and the turn runs as the owning user. Workflow
//! continuations get a fresh `wf-{workflow_id}-{nonce}` thread so each
//! phase starts from a cold context. If the turn errors, delivery degrades
//! to the notify path.

use uuid::Uuid;

use swb_domain::error::{Error, Result};
use swb_domain::protocol::{Notification, NotificationKind, NotificationType};

use crate::runtime::agent_loop::{self, AgentEvent, AgentInput};
use crate::runtime::conversation::ConversationKey;
use crate::runtime::scheduler::model::ScheduledJob;
use crate::state::AppState;

/// Resume the agent loop for a completed job, falling back to a plain
/// notification when resumption is impossible or the turn errors.
pub async fn resume_or_notify(state: &AppState, job: &ScheduledJob, content: String) {
    match resume(state, job, content.clone()).await {
        Ok(conversation_id) => {
            tracing::info!(
                job_id = %job.id,
                conversation_id = %conversation_id,
                "conversation resumed from job completion"
            );
        }
        Err(e) => {
            tracing::warn!(job_id = %job.id, error = %e, "continuation failed, degrading to notify");
            let pc = &job.platform_context;
            state.notifier.publish(Notification {
                message_type: NotificationType::Notification,
                platform: pc.platform.clone(),
                channel: pc.channel.clone(),
                thread: pc.thread.clone(),
                content,
                conversation_id: pc.conversation_id.clone(),
                kind: NotificationKind::JobSuccess,
                user_id: job.user_id.clone(),
            });
        }
    }
}

/// Synthesize the continuation message and drain the resulting turn.
/// Returns the conversation the turn ran in.
async fn resume(state: &AppState, job: &ScheduledJob, content: String) -> Result<String> {
    let conversation_id = resolve_conversation(state, job).await?;

    let (_, mut rx) = agent_loop::run_turn(
        state.clone(),
        AgentInput {
            user_id: job.user_id.clone(),
            conversation_id: conversation_id.clone(),
            content,
            model: None,
            hidden: true,
        },
    );

    // Drain the turn; a turn-level error downgrades to the notify path.
    while let Some(event) = rx.recv().await {
        if let AgentEvent::Error { message } = event {
            return Err(Error::Other(format!("continuation turn failed: {message}")));
        }
    }
    Ok(conversation_id)
}

/// Workflow jobs continue on a fresh thread; standalone jobs re-enter
/// their original conversation.
async fn resolve_conversation(state: &AppState, job: &ScheduledJob) -> Result<String> {
    let pc = &job.platform_context;
    if let Some(workflow_id) = job.workflow_id {
        let nonce = Uuid::new_v4().simple().to_string();
        let key = ConversationKey {
            platform: pc.platform.clone(),
            channel: pc.channel.clone(),
            thread: Some(format!("wf-{workflow_id}-{}", &nonce[..8])),
        };
        let conversation = state.conversations.resolve_or_create(&key, &job.user_id).await;
        return Ok(conversation.id);
    }

    let conversation_id = pc
        .conversation_id
        .clone()
        .ok_or_else(|| Error::Other("job has no conversation context".into()))?;
    state
        .conversations
        .get(&conversation_id)
        .await
        .map(|c| c.id)
        .ok_or_else(|| Error::Other(format!("conversation {conversation_id} no longer exists")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::model::{test_job, JobStatus, JobType, PlatformContext};
    use crate::state::tests::test_state;

    fn job_with_context(conversation_id: Option<String>, workflow: Option<Uuid>) -> ScheduledJob {
        let mut job = test_job(JobType::PollModule, JobStatus::Completed);
        job.workflow_id = workflow;
        job.platform_context = PlatformContext {
            platform: "discord".into(),
            channel: "ch1".into(),
            thread: None,
            conversation_id,
        };
        job
    }

    #[tokio::test]
    async fn missing_conversation_degrades_to_notify() {
        let (_env, state) = test_state();
        let job = job_with_context(None, None);

        resume_or_notify(&state, &job, "Task done. Deploy it.".into()).await;

        let mut rx = state.notifier.subscribe("discord").unwrap();
        let n = rx.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::JobSuccess);
        assert_eq!(n.content, "Task done. Deploy it.");
    }

    #[tokio::test]
    async fn workflow_continuation_gets_fresh_thread() {
        let (_env, state) = test_state();
        state.users.ensure_user("u1").await;
        let workflow_id = Uuid::new_v4();
        let job = job_with_context(None, Some(workflow_id));

        let conversation_id = resolve_conversation(&state, &job).await.unwrap();
        let conversation = state.conversations.get(&conversation_id).await.unwrap();
        let thread = conversation.key.thread.unwrap();
        assert!(
            thread.starts_with(&format!("wf-{workflow_id}-")),
            "thread {thread} should carry the workflow id"
        );

        // A second continuation of the same workflow starts cold.
        let second = resolve_conversation(&state, &job).await.unwrap();
        assert_ne!(conversation_id, second);
    }

    #[tokio::test]
    async fn standalone_job_reuses_its_conversation() {
        let (_env, state) = test_state();
        state.users.ensure_user("u1").await;
        let conversation = state
            .conversations
            .resolve_or_create(
                &ConversationKey {
                    platform: "discord".into(),
                    channel: "ch1".into(),
                    thread: None,
                },
                "u1",
            )
            .await;
        let job = job_with_context(Some(conversation.id.clone()), None);

        let resolved = resolve_conversation(&state, &job).await.unwrap();
        assert_eq!(resolved, conversation.id);
    }
}
