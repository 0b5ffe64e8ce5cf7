//! JobStore — persistent job and workflow storage.
//!
//! The store is the serialization point for job state: each worker
//! write-back happens inside one `update` closure, and terminal statuses
//! are immutable (updates against a terminal job are discarded).

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{
    derive_workflow_status, JobStatus, ScheduledJob, Workflow, WorkflowStatus,
};

pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, ScheduledJob>>,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    persist_path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct PersistedJobs {
    jobs: Vec<ScheduledJob>,
    workflows: Vec<Workflow>,
}

impl JobStore {
    pub fn new(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("jobs.json");
        let mut store = Self {
            jobs: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            persist_path,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        if let Ok(data) = std::fs::read_to_string(&self.persist_path) {
            if let Ok(persisted) = serde_json::from_str::<PersistedJobs>(&data) {
                let jobs: HashMap<_, _> =
                    persisted.jobs.into_iter().map(|j| (j.id, j)).collect();
                let workflows: HashMap<_, _> =
                    persisted.workflows.into_iter().map(|w| (w.id, w)).collect();
                tracing::info!(
                    jobs = jobs.len(),
                    workflows = workflows.len(),
                    "loaded scheduled jobs"
                );
                self.jobs = RwLock::new(jobs);
                self.workflows = RwLock::new(workflows);
            }
        }
    }

    async fn persist(&self) {
        let snapshot = PersistedJobs {
            jobs: self.jobs.read().await.values().cloned().collect(),
            workflows: self.workflows.read().await.values().cloned().collect(),
        };
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            let path = self.persist_path.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist jobs");
                }
            })
            .await;
        }
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub async fn insert(&self, job: ScheduledJob) -> ScheduledJob {
        self.jobs.write().await.insert(job.id, job.clone());
        self.persist().await;
        job
    }

    pub async fn get(&self, id: &Uuid) -> Option<ScheduledJob> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn list_for_user(&self, user_id: &str) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Atomic read-modify-write. Terminal statuses are immutable: once a
    /// job left `Active`, further updates are discarded and `None` is
    /// returned.
    pub async fn update(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut ScheduledJob),
    ) -> Option<ScheduledJob> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(id) {
                Some(job) if !job.status.is_terminal() => {
                    f(job);
                    Some(job.clone())
                }
                _ => None,
            }
        };
        if updated.is_some() {
            self.persist().await;
        }
        updated
    }

    /// Claim every active job due at `now`: their `next_run_at` is pushed
    /// forward provisionally so a slow evaluation is not re-selected by the
    /// next tick, and the claimed snapshots are returned.
    pub async fn claim_due(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<ScheduledJob> {
        let claimed = {
            let mut jobs = self.jobs.write().await;
            let mut claimed = Vec::new();
            for job in jobs.values_mut() {
                if job.status == JobStatus::Active
                    && job.next_run_at.map(|t| t <= now).unwrap_or(false)
                {
                    let snapshot = job.clone();
                    job.next_run_at =
                        Some(now + chrono::Duration::seconds(job.interval_seconds.max(1) as i64));
                    claimed.push(snapshot);
                }
            }
            claimed
        };
        if !claimed.is_empty() {
            self.persist().await;
        }
        claimed
    }

    /// Cancel one active job. Returns the cancelled record.
    pub async fn cancel_job(&self, id: &Uuid, reason: &str) -> Option<ScheduledJob> {
        self.update(id, |job| {
            job.status = JobStatus::Cancelled;
            job.status_message = Some(reason.to_string());
            job.completed_at = Some(Utc::now());
            job.next_run_at = None;
        })
        .await
    }

    /// Transition every *other* active job in the workflow to cancelled.
    /// Used for cascading cancellation; returns the cancelled jobs.
    pub async fn cancel_workflow_siblings(
        &self,
        workflow_id: Uuid,
        failed_job: &Uuid,
        reason: &str,
    ) -> Vec<ScheduledJob> {
        let cancelled = {
            let mut jobs = self.jobs.write().await;
            let mut cancelled = Vec::new();
            for job in jobs.values_mut() {
                if job.workflow_id == Some(workflow_id)
                    && job.id != *failed_job
                    && job.status == JobStatus::Active
                {
                    job.status = JobStatus::Cancelled;
                    job.status_message = Some(reason.to_string());
                    job.completed_at = Some(Utc::now());
                    job.next_run_at = None;
                    cancelled.push(job.clone());
                }
            }
            cancelled
        };
        if !cancelled.is_empty() {
            self.persist().await;
        }
        cancelled
    }

    // ── Workflows ──────────────────────────────────────────────────

    pub async fn insert_workflow(&self, workflow: Workflow) -> Workflow {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        self.persist().await;
        workflow
    }

    pub async fn get_workflow(&self, id: &Uuid) -> Option<Workflow> {
        self.workflows.read().await.get(id).cloned()
    }

    pub async fn list_workflows_for_user(&self, user_id: &str) -> Vec<Workflow> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        workflows
    }

    pub async fn workflow_jobs(&self, workflow_id: Uuid) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.workflow_id == Some(workflow_id))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn workflow_status(&self, workflow_id: Uuid) -> WorkflowStatus {
        let jobs = self.jobs.read().await;
        let members: Vec<&ScheduledJob> = jobs
            .values()
            .filter(|j| j.workflow_id == Some(workflow_id))
            .collect();
        derive_workflow_status(&members)
    }

    /// Cancel every active job in a workflow (user-initiated).
    pub async fn cancel_workflow(&self, workflow_id: Uuid, reason: &str) -> usize {
        let cancelled = {
            let mut jobs = self.jobs.write().await;
            let mut n = 0;
            for job in jobs.values_mut() {
                if job.workflow_id == Some(workflow_id) && job.status == JobStatus::Active {
                    job.status = JobStatus::Cancelled;
                    job.status_message = Some(reason.to_string());
                    job.completed_at = Some(Utc::now());
                    job.next_run_at = None;
                    n += 1;
                }
            }
            n
        };
        if cancelled > 0 {
            self.persist().await;
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::{test_job, JobType, OnComplete, PlatformContext};
    use super::*;

    fn temp_store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let (_dir, store) = temp_store();
        let job = store.insert(test_job(JobType::Delay, JobStatus::Active)).await;
        let fetched = store.get(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn terminal_status_is_immutable() {
        let (_dir, store) = temp_store();
        let job = store
            .insert(test_job(JobType::Delay, JobStatus::Active))
            .await;
        store
            .update(&job.id, |j| {
                j.status = JobStatus::Completed;
                j.completed_at = Some(Utc::now());
            })
            .await
            .unwrap();

        // A later tick must not mutate a terminal job.
        let result = store
            .update(&job.id, |j| {
                j.status = JobStatus::Active;
            })
            .await;
        assert!(result.is_none());
        assert_eq!(store.get(&job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn claim_due_pushes_next_run_forward() {
        let (_dir, store) = temp_store();
        let mut job = test_job(JobType::Delay, JobStatus::Active);
        job.next_run_at = Some(Utc::now() - chrono::Duration::seconds(5));
        job.interval_seconds = 60;
        let job = store.insert(job).await;

        let now = Utc::now();
        let claimed = store.claim_due(now).await;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, job.id);

        // A second claim within the same tick window finds nothing.
        assert!(store.claim_due(now).await.is_empty());

        let stored = store.get(&job.id).await.unwrap();
        assert!(stored.next_run_at.unwrap() > now);
    }

    #[tokio::test]
    async fn claim_due_skips_terminal_and_future_jobs() {
        let (_dir, store) = temp_store();
        let mut future = test_job(JobType::Delay, JobStatus::Active);
        future.next_run_at = Some(Utc::now() + chrono::Duration::hours(1));
        store.insert(future).await;
        store
            .insert(test_job(JobType::Delay, JobStatus::Cancelled))
            .await;

        assert!(store.claim_due(Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn cascade_cancels_only_active_siblings() {
        let (_dir, store) = temp_store();
        let wf = Uuid::new_v4();

        let mut failing = test_job(JobType::Delay, JobStatus::Active);
        failing.workflow_id = Some(wf);
        let failing = store.insert(failing).await;

        let mut sibling_active = test_job(JobType::Cron, JobStatus::Active);
        sibling_active.workflow_id = Some(wf);
        let sibling_active = store.insert(sibling_active).await;

        let mut sibling_done = test_job(JobType::Delay, JobStatus::Completed);
        sibling_done.workflow_id = Some(wf);
        let sibling_done = store.insert(sibling_done).await;

        let mut outsider = test_job(JobType::Delay, JobStatus::Active);
        outsider.workflow_id = None;
        let outsider = store.insert(outsider).await;

        let cancelled = store
            .cancel_workflow_siblings(wf, &failing.id, "a sibling job failed")
            .await;
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, sibling_active.id);
        assert_eq!(
            cancelled[0].status_message.as_deref(),
            Some("a sibling job failed")
        );

        assert_eq!(store.get(&failing.id).await.unwrap().status, JobStatus::Active);
        assert_eq!(
            store.get(&sibling_done.id).await.unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(store.get(&outsider.id).await.unwrap().status, JobStatus::Active);
    }

    #[tokio::test]
    async fn workflow_status_derivation() {
        let (_dir, store) = temp_store();
        let wf = Uuid::new_v4();
        store
            .insert_workflow(Workflow {
                id: wf,
                name: "deploy".into(),
                description: None,
                user_id: "u1".into(),
                created_at: Utc::now(),
            })
            .await;

        let mut j1 = test_job(JobType::Delay, JobStatus::Active);
        j1.workflow_id = Some(wf);
        let j1 = store.insert(j1).await;

        assert_eq!(store.workflow_status(wf).await, WorkflowStatus::Active);

        store
            .update(&j1.id, |j| {
                j.status = JobStatus::Failed;
            })
            .await;
        assert_eq!(store.workflow_status(wf).await, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn jobs_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = JobStore::new(dir.path());
            let mut job = test_job(JobType::PollModule, JobStatus::Active);
            job.on_complete = OnComplete::ResumeConversation;
            job.platform_context = PlatformContext {
                platform: "discord".into(),
                channel: "ch".into(),
                thread: None,
                conversation_id: Some("conv".into()),
            };
            store.insert(job).await.id
        };
        let store = JobStore::new(dir.path());
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.on_complete, OnComplete::ResumeConversation);
        assert_eq!(job.platform_context.platform, "discord");
    }
}
