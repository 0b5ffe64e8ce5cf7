use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Root directory under which per-task workspaces live.
    #[serde(default = "d_workspace_root")]
    pub workspace_root: std::path::PathBuf,
    /// Container image used for coding tasks.
    #[serde(default = "d_image")]
    pub image: String,
    /// Container status probe interval.
    #[serde(default = "d_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Missed-heartbeat window before a task is declared dead.
    #[serde(default = "d_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Default per-task wall-clock limit.
    #[serde(default = "d_default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Interactive terminal sessions allowed per task.
    #[serde(default = "d_max_terminal_sessions")]
    pub max_terminal_sessions: usize,
    /// Idle window after which a terminal session is closed.
    #[serde(default = "d_terminal_idle_timeout_secs")]
    pub terminal_idle_timeout_secs: u64,
    /// Capacity of the per-task live log fan-out channel; overflow drops
    /// the oldest entries (counted).
    #[serde(default = "d_log_channel_capacity")]
    pub log_channel_capacity: usize,
}

fn d_workspace_root() -> std::path::PathBuf {
    "./data/workspaces".into()
}

fn d_image() -> String {
    "switchboard/coder:latest".into()
}

fn d_heartbeat_secs() -> u64 {
    5
}

fn d_heartbeat_timeout_secs() -> u64 {
    60
}

fn d_default_timeout_secs() -> u64 {
    1_800
}

fn d_max_terminal_sessions() -> usize {
    5
}

fn d_terminal_idle_timeout_secs() -> u64 {
    86_400
}

fn d_log_channel_capacity() -> usize {
    256
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workspace_root: d_workspace_root(),
            image: d_image(),
            heartbeat_secs: d_heartbeat_secs(),
            heartbeat_timeout_secs: d_heartbeat_timeout_secs(),
            default_timeout_secs: d_default_timeout_secs(),
            max_terminal_sessions: d_max_terminal_sessions(),
            terminal_idle_timeout_secs: d_terminal_idle_timeout_secs(),
            log_channel_capacity: d_log_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = SupervisorConfig::default();
        assert_eq!(c.heartbeat_secs, 5);
        assert_eq!(c.default_timeout_secs, 1_800);
        assert_eq!(c.max_terminal_sessions, 5);
        assert_eq!(c.terminal_idle_timeout_secs, 86_400);
    }
}
