mod agent;
mod llm;
mod modules;
mod scheduler;
mod server;
mod supervisor;

pub use agent::*;
pub use llm::*;
pub use modules::*;
pub use scheduler::*;
pub use server::*;
pub use supervisor::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn error(field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warning(field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate cross-field constraints. Errors prevent startup; warnings
    /// are logged and ignored.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(error("server.port", "must be non-zero"));
        }

        if self.llm.providers.is_empty() {
            issues.push(warning(
                "llm.providers",
                "no LLM providers configured; agent turns will fail",
            ));
        }
        for (i, p) in self.llm.providers.iter().enumerate() {
            if p.model_patterns.is_empty() {
                issues.push(error(
                    &format!("llm.providers[{i}].model_patterns"),
                    "at least one model pattern is required",
                ));
            }
        }
        if self.llm.fallback_chain.is_empty() {
            issues.push(warning(
                "llm.fallback_chain",
                "empty fallback chain; transient provider errors will surface directly",
            ));
        }

        if self.modules.endpoints.is_empty() {
            issues.push(warning(
                "modules.endpoints",
                "no module endpoints configured; only built-in tools will be visible",
            ));
        }
        for (name, url) in &self.modules.endpoints {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(error(
                    &format!("modules.endpoints.{name}"),
                    "base URL must start with http:// or https://",
                ));
            }
        }

        if self.agent.max_iterations == 0 {
            issues.push(error("agent.max_iterations", "must be at least 1"));
        }
        if self.scheduler.tick_secs == 0 {
            issues.push(error("scheduler.tick_secs", "must be at least 1"));
        }
        if self.scheduler.max_concurrent_jobs == 0 {
            issues.push(error("scheduler.max_concurrent_jobs", "must be at least 1"));
        }
        if self.supervisor.max_terminal_sessions == 0 {
            issues.push(error("supervisor.max_terminal_sessions", "must be at least 1"));
        }

        issues
    }
}
