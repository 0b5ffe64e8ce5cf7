use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Environment variable holding the API bearer token. Unset variable
    /// means auth is disabled (dev mode).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Directory for persisted state (jobs, tasks, conversations, logs).
    #[serde(default = "d_state_path")]
    pub state_path: std::path::PathBuf,
    /// Allowed CORS origins; `["*"]` means fully permissive.
    #[serde(default = "d_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_port() -> u16 {
    8080
}

fn d_api_token_env() -> String {
    "SWB_API_TOKEN".into()
}

fn d_state_path() -> std::path::PathBuf {
    "./data/state".into()
}

fn d_allowed_origins() -> Vec<String> {
    vec!["http://localhost:*".into()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_api_token_env(),
            state_path: d_state_path(),
            allowed_origins: d_allowed_origins(),
        }
    }
}
