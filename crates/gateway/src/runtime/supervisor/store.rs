//! TaskStore — task records with a terminal-once transition guard.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::model::{TaskRecord, TaskStatus};

pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
    persist_path: PathBuf,
}

impl TaskStore {
    pub fn new(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("tasks.json");
        let mut store = Self {
            tasks: RwLock::new(HashMap::new()),
            persist_path,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        if let Ok(data) = std::fs::read_to_string(&self.persist_path) {
            if let Ok(tasks) = serde_json::from_str::<Vec<TaskRecord>>(&data) {
                let map: HashMap<_, _> = tasks.into_iter().map(|t| (t.id, t)).collect();
                tracing::info!(count = map.len(), "loaded tasks");
                self.tasks = RwLock::new(map);
            }
        }
    }

    async fn persist(&self) {
        let tasks: Vec<TaskRecord> = self.tasks.read().values().cloned().collect();
        if let Ok(json) = serde_json::to_string(&tasks) {
            let path = self.persist_path.clone();
            // Spawn blocking to avoid blocking the Tokio executor.
            let _ = tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist tasks");
                }
            })
            .await;
        }
    }

    pub async fn insert(&self, task: TaskRecord) -> TaskRecord {
        self.tasks.write().insert(task.id, task.clone());
        self.persist().await;
        task
    }

    pub fn get(&self, id: &Uuid) -> Option<TaskRecord> {
        self.tasks.read().get(id).cloned()
    }

    pub fn list(&self, owner: Option<&str>, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let tasks = self.tasks.read();
        let mut out: Vec<TaskRecord> = tasks
            .values()
            .filter(|t| owner.map(|o| t.owner_user_id == o).unwrap_or(true))
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Mutate non-status fields. Returns the updated record.
    pub async fn update(&self, id: &Uuid, f: impl FnOnce(&mut TaskRecord)) -> Option<TaskRecord> {
        let updated = {
            let mut tasks = self.tasks.write();
            tasks.get_mut(id).map(|task| {
                f(task);
                task.clone()
            })
        };
        if updated.is_some() {
            self.persist().await;
        }
        updated
    }

    /// Transition to a new status. A task reaches a terminal status exactly
    /// once: transitions out of (or into a second) terminal state are
    /// refused and `None` is returned.
    pub async fn transition(&self, id: &Uuid, status: TaskStatus) -> Option<TaskRecord> {
        let updated = {
            let mut tasks = self.tasks.write();
            let task = tasks.get_mut(id)?;
            if task.status.is_terminal() {
                return None;
            }
            task.status = status;
            if status.is_terminal() {
                task.finished_at = Some(Utc::now());
            }
            if status == TaskStatus::Running && task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            Some(task.clone())
        };
        if updated.is_some() {
            self.persist().await;
        }
        updated
    }

    /// Walk the continuation chain root-first, ending at `id`.
    ///
    /// `parent_task_id` links form a DAG by construction (a child is always
    /// created after its parent); the visited set guards against corrupted
    /// state ever looping the walk.
    pub fn chain(&self, id: &Uuid) -> Vec<TaskRecord> {
        let tasks = self.tasks.read();
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = tasks.get(id).cloned();
        while let Some(task) = cursor {
            if !visited.insert(task.id) {
                tracing::warn!(task_id = %task.id, "cycle detected in task chain");
                break;
            }
            cursor = task
                .parent_task_id
                .and_then(|parent| tasks.get(&parent).cloned());
            chain.push(task);
        }
        chain.reverse();
        chain
    }
}
