//! Users and personas.
//!
//! Users are created on first successful authentication and never deleted
//! while referenced. A persona is a system prompt plus an optional module
//! allowlist that narrows which tools its conversations can see.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use swb_domain::manifest::Permission;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub permission: Permission,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    /// When set, only these modules' tools are visible to the LLM.
    #[serde(default)]
    pub allowed_modules: Option<Vec<String>>,
    /// Whether synthesized continuation messages appear in user-facing
    /// transcripts.
    #[serde(default)]
    pub show_continuations: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UserStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
    personas: RwLock<HashMap<String, Persona>>,
    persist_path: PathBuf,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedUsers {
    users: Vec<User>,
    personas: Vec<Persona>,
}

impl UserStore {
    pub fn new(state_path: &std::path::Path) -> Self {
        let persist_path = state_path.join("users.json");
        let mut store = Self {
            users: RwLock::new(HashMap::new()),
            personas: RwLock::new(HashMap::new()),
            persist_path,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        if let Ok(data) = std::fs::read_to_string(&self.persist_path) {
            if let Ok(persisted) = serde_json::from_str::<PersistedUsers>(&data) {
                let users: HashMap<_, _> =
                    persisted.users.into_iter().map(|u| (u.id.clone(), u)).collect();
                let personas: HashMap<_, _> = persisted
                    .personas
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect();
                tracing::info!(users = users.len(), personas = personas.len(), "loaded users");
                self.users = RwLock::new(users);
                self.personas = RwLock::new(personas);
            }
        }
    }

    async fn persist(&self) {
        let snapshot = PersistedUsers {
            users: self.users.read().await.values().cloned().collect(),
            personas: self.personas.read().await.values().cloned().collect(),
        };
        if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
            let path = self.persist_path.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(error = %e, "failed to persist users");
                }
            })
            .await;
        }
    }

    /// Fetch a user, creating them with the default permission on first
    /// sight (first successful authentication).
    pub async fn ensure_user(&self, user_id: &str) -> User {
        if let Some(user) = self.users.read().await.get(user_id) {
            return user.clone();
        }
        let user = User {
            id: user_id.to_string(),
            display_name: None,
            permission: Permission::default(),
            created_at: Utc::now(),
        };
        self.users
            .write()
            .await
            .insert(user_id.to_string(), user.clone());
        self.persist().await;
        tracing::info!(user_id = %user_id, "created user on first authentication");
        user
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.read().await.get(user_id).cloned()
    }

    pub async fn set_permission(&self, user_id: &str, permission: Permission) -> bool {
        let updated = {
            let mut users = self.users.write().await;
            match users.get_mut(user_id) {
                Some(user) => {
                    user.permission = permission;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.persist().await;
        }
        updated
    }

    pub async fn upsert_persona(&self, persona: Persona) {
        self.personas
            .write()
            .await
            .insert(persona.id.clone(), persona);
        self.persist().await;
    }

    pub async fn get_persona(&self, persona_id: &str) -> Option<Persona> {
        self.personas.read().await.get(persona_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, UserStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn ensure_user_creates_once() {
        let (_dir, store) = temp_store();
        let u1 = store.ensure_user("u1").await;
        assert_eq!(u1.permission, Permission::User);

        store.set_permission("u1", Permission::Admin).await;
        let again = store.ensure_user("u1").await;
        assert_eq!(again.permission, Permission::Admin, "existing user not recreated");
    }

    #[tokio::test]
    async fn persona_roundtrip() {
        let (_dir, store) = temp_store();
        store
            .upsert_persona(Persona {
                id: "coder".into(),
                name: "Coder".into(),
                system_prompt: "You write code.".into(),
                allowed_modules: Some(vec!["tasks".into()]),
                show_continuations: false,
            })
            .await;
        let p = store.get_persona("coder").await.unwrap();
        assert_eq!(p.allowed_modules.unwrap(), vec!["tasks"]);
    }

    #[tokio::test]
    async fn users_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UserStore::new(dir.path());
            store.ensure_user("u1").await;
            store.set_permission("u1", Permission::Owner).await;
        }
        let store = UserStore::new(dir.path());
        let u = store.get_user("u1").await.unwrap();
        assert_eq!(u.permission, Permission::Owner);
    }
}
