use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// LLM round-trips allowed per user message before the turn is cut off.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock budget for one turn, in seconds.
    #[serde(default = "d_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    /// Recent messages loaded as conversation history.
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn d_max_iterations() -> u32 {
    8
}

fn d_turn_timeout_secs() -> u64 {
    600
}

fn d_history_limit() -> usize {
    50
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            turn_timeout_secs: d_turn_timeout_secs(),
            history_limit: d_history_limit(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AgentConfig::default();
        assert_eq!(c.max_iterations, 8);
        assert_eq!(c.turn_timeout_secs, 600);
        assert_eq!(c.history_limit, 50);
    }
}
