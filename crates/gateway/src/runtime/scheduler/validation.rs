//! Job creation arguments and their validation.
//!
//! Everything rejected here never reaches the store: `max_attempts = 0`,
//! malformed cron expressions, unknown timezones, missing per-type config
//! fields.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use swb_domain::error::{Error, Result};

use super::cron;
use super::model::{
    CronConfig, DelayConfig, JobType, OnComplete, PollModuleConfig, PollUrlConfig, WebhookConfig,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// add_job arguments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddJobArgs {
    pub job_type: JobType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub check_config: Value,
    #[serde(default = "d_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub on_success_message: String,
    #[serde(default)]
    pub on_failure_message: Option<String>,
    #[serde(default)]
    pub on_complete: OnComplete,
    #[serde(default)]
    pub result_summary_fields: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn validate(args: &AddJobArgs) -> Result<()> {
    if args.max_attempts == Some(0) {
        return Err(Error::validation("max_attempts", "must be at least 1 when set"));
    }
    if args.max_runs == Some(0) {
        return Err(Error::validation("max_runs", "must be at least 1 when set"));
    }
    if args.interval_seconds == 0 {
        return Err(Error::validation("interval_seconds", "must be at least 1"));
    }
    if args.on_success_message.is_empty() {
        return Err(Error::validation("on_success_message", "must not be empty"));
    }
    if let Some(expires) = args.expires_at {
        if expires <= Utc::now() {
            return Err(Error::validation("expires_at", "must be in the future"));
        }
    }

    match args.job_type {
        JobType::PollModule => {
            let config: PollModuleConfig = parse_config(&args.check_config)?;
            if config.tool.split('.').count() < 2 {
                return Err(Error::validation(
                    "check_config.tool",
                    "expected a fully qualified tool name (module.op)",
                ));
            }
            if config.success_field.is_empty() {
                return Err(Error::validation(
                    "check_config.success_field",
                    "must not be empty",
                ));
            }
            if config.success_value.is_none() && config.success_values.is_none() {
                return Err(Error::validation(
                    "check_config",
                    "one of success_value or success_values is required",
                ));
            }
        }
        JobType::PollUrl => {
            let config: PollUrlConfig = parse_config(&args.check_config)?;
            if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
                return Err(Error::validation(
                    "check_config.url",
                    "must be an http(s) URL",
                ));
            }
        }
        JobType::Delay => {
            let config: DelayConfig = parse_config(&args.check_config)?;
            if config.delay_seconds == 0 {
                return Err(Error::validation(
                    "check_config.delay_seconds",
                    "must be at least 1",
                ));
            }
        }
        JobType::Cron => {
            let config: CronConfig = parse_config(&args.check_config)?;
            cron::validate_expr(&config.cron_expr)?;
            cron::parse_tz(&config.timezone)?;
            if args.max_attempts.is_some() {
                return Err(Error::validation(
                    "max_attempts",
                    "cron jobs do not use max_attempts; use max_runs",
                ));
            }
        }
        JobType::Webhook => {
            let _config: WebhookConfig = parse_config(&args.check_config)?;
        }
    }

    Ok(())
}

fn parse_config<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::validation("check_config", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_args() -> AddJobArgs {
        serde_json::from_value(serde_json::json!({
            "job_type": "poll_module",
            "check_config": {
                "tool": "tasks.task_status",
                "args": {"task_id": "T"},
                "success_field": "status",
                "success_values": ["completed"],
            },
            "on_success_message": "done: {result.status}",
        }))
        .unwrap()
    }

    #[test]
    fn valid_poll_module_passes() {
        assert!(validate(&poll_args()).is_ok());
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let mut args = poll_args();
        args.max_attempts = Some(0);
        let err = validate(&args).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn defaults_applied() {
        let args = poll_args();
        assert_eq!(args.interval_seconds, 60);
        assert_eq!(args.on_complete, OnComplete::Notify);
    }

    #[test]
    fn poll_module_requires_success_condition() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "poll_module",
            "check_config": {
                "tool": "tasks.task_status",
                "success_field": "status",
            },
            "on_success_message": "done",
        }))
        .unwrap();
        assert!(validate(&args).is_err());
    }

    #[test]
    fn unqualified_tool_name_rejected() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "poll_module",
            "check_config": {
                "tool": "task_status",
                "success_field": "status",
                "success_value": "completed",
            },
            "on_success_message": "done",
        }))
        .unwrap();
        assert!(validate(&args).is_err());
    }

    #[test]
    fn invalid_cron_rejected_at_creation() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "cron",
            "check_config": {"cron_expr": "every tuesday"},
            "on_success_message": "tick",
        }))
        .unwrap();
        assert!(validate(&args).is_err());
    }

    #[test]
    fn cron_with_max_attempts_rejected() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "cron",
            "check_config": {"cron_expr": "* * * * *"},
            "max_attempts": 3,
            "on_success_message": "tick",
        }))
        .unwrap();
        assert!(validate(&args).is_err());
    }

    #[test]
    fn cron_with_unknown_timezone_rejected() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "cron",
            "check_config": {"cron_expr": "* * * * *", "timezone": "Mars/Olympus"},
            "on_success_message": "tick",
        }))
        .unwrap();
        assert!(validate(&args).is_err());
    }

    #[test]
    fn poll_url_requires_http_url() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "poll_url",
            "check_config": {"url": "ftp://example.com"},
            "on_success_message": "up",
        }))
        .unwrap();
        assert!(validate(&args).is_err());
    }

    #[test]
    fn webhook_with_secret_passes() {
        let args: AddJobArgs = serde_json::from_value(serde_json::json!({
            "job_type": "webhook",
            "check_config": {"secret": "s"},
            "on_success_message": "fired: {result}",
        }))
        .unwrap();
        assert!(validate(&args).is_ok());
    }
}
