use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker tick interval.
    #[serde(default = "d_tick_secs")]
    pub tick_secs: u64,
    /// Concurrency cap for per-tick job evaluation fan-out.
    #[serde(default = "d_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Exponential-backoff ceiling for transient failures, in seconds.
    #[serde(default = "d_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Window in which a repeated webhook delivery is treated as the same
    /// firing and acknowledged without re-running the job.
    #[serde(default = "d_webhook_replay_window_secs")]
    pub webhook_replay_window_secs: u64,
    /// Truncation limit for `{result}` placeholder rendering.
    #[serde(default = "d_result_render_limit")]
    pub result_render_limit: usize,
}

fn d_tick_secs() -> u64 {
    10
}

fn d_max_concurrent_jobs() -> usize {
    32
}

fn d_backoff_cap_secs() -> u64 {
    300
}

fn d_webhook_replay_window_secs() -> u64 {
    5
}

fn d_result_render_limit() -> usize {
    2_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: d_tick_secs(),
            max_concurrent_jobs: d_max_concurrent_jobs(),
            backoff_cap_secs: d_backoff_cap_secs(),
            webhook_replay_window_secs: d_webhook_replay_window_secs(),
            result_render_limit: d_result_render_limit(),
        }
    }
}
