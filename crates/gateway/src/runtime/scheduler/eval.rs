//! Per-type job condition evaluation.
//!
//! Each evaluator produces an [`Outcome`]: the condition was met (with the
//! value that made it succeed — placeholder rendering observes exactly this
//! value), not met yet, or errored transiently/permanently.

use chrono::Utc;
use serde_json::Value;

use swb_domain::error::message_is_permanent;
use swb_domain::path;
use swb_domain::tool::UserContext;

use super::model::{
    CronConfig, DelayConfig, JobType, Operator, PollModuleConfig, PollUrlConfig, ScheduledJob,
};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum Outcome {
    /// Condition met; carries the value that satisfied it.
    Met(Value),
    /// Evaluated cleanly but the condition is not satisfied yet.
    NotMet(Option<Value>),
    /// Transient error — retried with backoff.
    TransientError(String),
    /// Permanent error — the job fails immediately.
    PermanentError(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Evaluate one due job. Webhook jobs are never evaluated by the worker;
/// seeing one here is a bug upstream and reported permanent.
pub async fn evaluate(state: &AppState, job: &ScheduledJob) -> Outcome {
    match job.job_type {
        JobType::PollModule => match serde_json::from_value::<PollModuleConfig>(job.check_config.clone()) {
            Ok(config) => poll_module(state, job, &config).await,
            Err(e) => Outcome::PermanentError(format!("invalid check_config: {e}")),
        },
        JobType::PollUrl => match serde_json::from_value::<PollUrlConfig>(job.check_config.clone()) {
            Ok(config) => poll_url(state, &config).await,
            Err(e) => Outcome::PermanentError(format!("invalid check_config: {e}")),
        },
        JobType::Delay => match serde_json::from_value::<DelayConfig>(job.check_config.clone()) {
            Ok(config) => delay(job, &config),
            Err(e) => Outcome::PermanentError(format!("invalid check_config: {e}")),
        },
        JobType::Cron => match serde_json::from_value::<CronConfig>(job.check_config.clone()) {
            // A cron job selected by the ticker is due by definition.
            Ok(_) => Outcome::Met(Value::Null),
            Err(e) => Outcome::PermanentError(format!("invalid check_config: {e}")),
        },
        JobType::Webhook => {
            Outcome::PermanentError("webhook jobs fire via the HTTP endpoint only".into())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// poll_module
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn poll_module(state: &AppState, job: &ScheduledJob, config: &PollModuleConfig) -> Outcome {
    let pc = &job.platform_context;
    let ctx = UserContext {
        user_id: job.user_id.clone(),
        platform: pc.platform.clone(),
        channel: pc.channel.clone(),
        thread: pc.thread.clone(),
        conversation_id: pc.conversation_id.clone().unwrap_or_default(),
    };

    let result = crate::runtime::tools::dispatch_tool(
        state,
        &config.tool,
        config.args.clone(),
        &ctx,
        None,
    )
    .await;

    if !result.success {
        let error = result.error.unwrap_or_else(|| "unknown error".into());
        if message_is_permanent(&error) || error == "UnknownTool" {
            return Outcome::PermanentError(error);
        }
        return Outcome::TransientError(error);
    }

    let value = result.result.unwrap_or(Value::Null);
    let actual = match path::lookup(&value, &config.success_field) {
        Some(v) => v.clone(),
        None => return Outcome::NotMet(Some(value)),
    };

    if compare(
        &actual,
        config.success_operator,
        config.success_value.as_ref(),
        config.success_values.as_deref(),
    ) {
        Outcome::Met(value)
    } else {
        Outcome::NotMet(Some(value))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// poll_url
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn poll_url(state: &AppState, config: &PollUrlConfig) -> Outcome {
    let method = match config.method.to_uppercase().parse::<reqwest::Method>() {
        Ok(m) => m,
        Err(_) => return Outcome::PermanentError(format!("invalid method '{}'", config.method)),
    };

    let response = match state
        .http
        .request(method, &config.url)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return Outcome::TransientError(format!("request failed: {e}")),
    };

    let status = response.status().as_u16();
    if status == 404 || status == 410 {
        return Outcome::PermanentError(format!("HTTP {status}"));
    }
    if status != config.expected_status {
        // Wrong status is simply "not yet" for probes expecting a terminal
        // state, unless it signals a server fault worth backing off from.
        if status >= 500 {
            return Outcome::TransientError(format!("HTTP {status}"));
        }
        return Outcome::NotMet(Some(serde_json::json!({"status": status})));
    }

    let body_text = match response.text().await {
        Ok(t) => t,
        Err(e) => return Outcome::TransientError(format!("body read failed: {e}")),
    };

    let Some(field) = &config.response_field else {
        // Status alone decides.
        let body: Value = serde_json::from_str(&body_text)
            .unwrap_or_else(|_| serde_json::json!({"body": body_text}));
        return Outcome::Met(body);
    };

    // A response_field on a non-JSON body fails the attempt as transient.
    let body: Value = match serde_json::from_str(&body_text) {
        Ok(v) => v,
        Err(e) => return Outcome::TransientError(format!("non-JSON body: {e}")),
    };

    let actual = match path::lookup(&body, field) {
        Some(v) => v.clone(),
        None => return Outcome::NotMet(Some(body)),
    };

    if compare(
        &actual,
        config.response_operator,
        config.response_value.as_ref(),
        config.response_values.as_deref(),
    ) {
        Outcome::Met(body)
    } else {
        Outcome::NotMet(Some(body))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// delay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn delay(job: &ScheduledJob, config: &DelayConfig) -> Outcome {
    let deadline = job.created_at + chrono::Duration::seconds(config.delay_seconds as i64);
    if deadline <= Utc::now() {
        Outcome::Met(serde_json::json!({"elapsed_seconds": config.delay_seconds}))
    } else {
        Outcome::NotMet(None)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Comparison
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compare `actual` with the expected value(s) under the operator.
///
/// `In` matches any of `values` (falling back to the single `value`);
/// ordering operators compare numerically; `Contains` checks substring or
/// array membership.
pub fn compare(
    actual: &Value,
    operator: Operator,
    value: Option<&Value>,
    values: Option<&[Value]>,
) -> bool {
    let single = || values.and_then(|v| v.first()).or(value);
    match operator {
        Operator::In => {
            if let Some(set) = values {
                set.iter().any(|v| v == actual)
            } else {
                value.map(|v| v == actual).unwrap_or(false)
            }
        }
        Operator::Eq => single().map(|v| v == actual).unwrap_or(false),
        Operator::Neq => single().map(|v| v != actual).unwrap_or(false),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let (Some(a), Some(b)) = (as_f64(actual), single().and_then(as_f64)) else {
                return false;
            };
            match operator {
                Operator::Gt => a > b,
                Operator::Gte => a >= b,
                Operator::Lt => a < b,
                Operator::Lte => a <= b,
                _ => unreachable!(),
            }
        }
        Operator::Contains => match (actual, single()) {
            (Value::String(haystack), Some(Value::String(needle))) => haystack.contains(needle),
            (Value::Array(items), Some(needle)) => items.iter().any(|v| v == needle),
            _ => false,
        },
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
