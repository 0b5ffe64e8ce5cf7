use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Module discovery & dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// `module_name -> base_url` for every deployed module service.
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    /// Timeout for `GET /manifest` during discovery.
    #[serde(default = "d_manifest_timeout_ms")]
    pub manifest_timeout_ms: u64,
    /// Manifest cache TTL before a background refresh is due.
    #[serde(default = "d_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Timeout for `POST /execute` on a tool call.
    #[serde(default = "d_execute_timeout_secs")]
    pub execute_timeout_secs: u64,
    /// Tools (or whole modules) allowed the raised timeout — code
    /// execution, biometric sync, and similar long-running operations.
    #[serde(default)]
    pub slow_tools: Vec<String>,
    #[serde(default = "d_slow_execute_timeout_secs")]
    pub slow_execute_timeout_secs: u64,
}

fn d_manifest_timeout_ms() -> u64 {
    2_000
}

fn d_cache_ttl_secs() -> u64 {
    3_600
}

fn d_execute_timeout_secs() -> u64 {
    30
}

fn d_slow_execute_timeout_secs() -> u64 {
    120
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            manifest_timeout_ms: d_manifest_timeout_ms(),
            cache_ttl_secs: d_cache_ttl_secs(),
            execute_timeout_secs: d_execute_timeout_secs(),
            slow_tools: Vec::new(),
            slow_execute_timeout_secs: d_slow_execute_timeout_secs(),
        }
    }
}

impl ModulesConfig {
    /// Whether a tool gets the raised timeout. Matches the full tool name
    /// or its module prefix.
    pub fn is_slow_tool(&self, tool_name: &str) -> bool {
        let module = tool_name.split('.').next().unwrap_or(tool_name);
        self.slow_tools
            .iter()
            .any(|s| s == tool_name || s == module)
    }
}
