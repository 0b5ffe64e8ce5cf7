//! Shared application state passed to all API handlers and workers.

use std::sync::Arc;

use swb_domain::config::Config;
use swb_modules::{ModuleRegistry, ToolDispatcher};
use swb_providers::LlmRouter;

use crate::runtime::cancel::CancelMap;
use crate::runtime::conversation::ConversationStore;
use crate::runtime::conversation_lock::ConversationLockMap;
use crate::runtime::notify::NotificationBus;
use crate::runtime::recall::{NoopRecall, RecallProvider};
use crate::runtime::scheduler::{JobStore, WebhookDedupe};
use crate::runtime::supervisor::container::ContainerRuntime;
use crate::runtime::supervisor::logs::LogStore;
use crate::runtime::supervisor::store::TaskStore;
use crate::runtime::supervisor::terminal::TerminalManager;
use crate::runtime::users::UserStore;

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core services** — config, module registry, dispatcher, LLM router
/// - **Conversations** — users, conversations, per-conversation locks,
///   cancellation
/// - **Scheduler** — job store, webhook replay window
/// - **Supervisor** — tasks, logs, terminals, container runtime
/// - **Outbound** — notification bus
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    /// Shared client for scheduler URL probes.
    pub http: reqwest::Client,
    pub registry: Arc<ModuleRegistry>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub llm: Arc<LlmRouter>,

    // ── Conversations ─────────────────────────────────────────────
    pub users: Arc<UserStore>,
    pub conversations: Arc<ConversationStore>,
    pub conversation_locks: Arc<ConversationLockMap>,
    pub cancel_map: Arc<CancelMap>,
    pub recall: Arc<dyn RecallProvider>,

    // ── Scheduler ─────────────────────────────────────────────────
    pub jobs: Arc<JobStore>,
    pub webhook_dedupe: Arc<WebhookDedupe>,

    // ── Supervisor ────────────────────────────────────────────────
    pub tasks: Arc<TaskStore>,
    pub logs: Arc<LogStore>,
    pub terminals: Arc<TerminalManager>,
    pub containers: Arc<dyn ContainerRuntime>,

    // ── Outbound ──────────────────────────────────────────────────
    pub notifier: Arc<NotificationBus>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 hash of the API bearer token. `None` = dev mode (no auth).
    pub api_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Assemble the state from config plus the two pieces with external
    /// dependencies (LLM router, container runtime).
    pub fn build(
        config: Arc<Config>,
        llm: Arc<LlmRouter>,
        containers: Arc<dyn ContainerRuntime>,
        api_token_hash: Option<Vec<u8>>,
    ) -> Self {
        let state_path = config.server.state_path.clone();
        let registry = Arc::new(ModuleRegistry::new(&config.modules));
        let dispatcher = Arc::new(ToolDispatcher::new(registry.clone(), &config.modules));

        Self {
            http: reqwest::Client::new(),
            registry,
            dispatcher,
            llm,
            users: Arc::new(UserStore::new(&state_path)),
            conversations: Arc::new(ConversationStore::new(&state_path)),
            conversation_locks: Arc::new(ConversationLockMap::new()),
            cancel_map: Arc::new(CancelMap::new()),
            recall: Arc::new(NoopRecall),
            jobs: Arc::new(JobStore::new(&state_path)),
            webhook_dedupe: Arc::new(WebhookDedupe::new(std::time::Duration::from_secs(
                config.scheduler.webhook_replay_window_secs,
            ))),
            tasks: Arc::new(TaskStore::new(&state_path)),
            logs: Arc::new(LogStore::new(
                &state_path,
                config.supervisor.log_channel_capacity,
            )),
            terminals: Arc::new(TerminalManager::new(
                config.supervisor.max_terminal_sessions,
                std::time::Duration::from_secs(config.supervisor.terminal_idle_timeout_secs),
            )),
            containers,
            notifier: Arc::new(NotificationBus::new(256)),
            api_token_hash,
            config,
        }
    }
}
