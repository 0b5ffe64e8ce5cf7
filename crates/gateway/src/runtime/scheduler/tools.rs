//! The scheduler's tool surface (`scheduler.*`).
//!
//! These tools are handled in-process — they never go over HTTP — but they
//! present the same manifest/execute shape as real modules so the LLM sees
//! one uniform tool list.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use swb_domain::manifest::{ParamKind, Permission, ToolDefinition, ToolParameter};
use swb_domain::tool::{ToolResult, UserContext};

use super::model::{
    webhook_sentinel, CronConfig, DelayConfig, JobStatus, JobType, PlatformContext, ScheduledJob,
    Workflow,
};
use super::cron;
use super::validation::{self, AddJobArgs};
use crate::runtime::users::User;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn param(name: &str, kind: ParamKind, description: &str, required: bool) -> ToolParameter {
    ToolParameter {
        name: name.into(),
        kind,
        description: description.into(),
        required,
        allowed_values: None,
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "scheduler.add_job".into(),
            description: "Create a background job: poll a module tool or URL until a condition \
                          holds, wait a fixed delay, run on a cron schedule, or wait for an \
                          external webhook. On completion a message is delivered or the \
                          conversation is resumed."
                .into(),
            parameters: vec![
                param("job_type", ParamKind::String, "poll_module | delay | poll_url | cron | webhook", true),
                param("check_config", ParamKind::Object, "Per-type configuration (tool/args/success_field, url, delay_seconds, cron_expr/timezone, secret)", true),
                param("on_success_message", ParamKind::String, "Message template; {result.path} placeholders are expanded", true),
                param("interval_seconds", ParamKind::Integer, "Seconds between evaluations (default 60)", false),
                param("max_attempts", ParamKind::Integer, "Give up after this many evaluations", false),
                param("max_runs", ParamKind::Integer, "Cron only: total fires before terminating", false),
                param("expires_at", ParamKind::String, "ISO-8601 expiry", false),
                param("on_failure_message", ParamKind::String, "Delivered if the job fails", false),
                param("on_complete", ParamKind::String, "notify | resume_conversation", false),
                param("name", ParamKind::String, "Human-readable job name", false),
                param("result_summary_fields", ParamKind::Array, "Project {result} to these fields", false),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "scheduler.create_workflow".into(),
            description: "Create a named group of jobs that fail together: if any job fails, \
                          the remaining active jobs are cancelled."
                .into(),
            parameters: vec![
                param("name", ParamKind::String, "Workflow name", true),
                param("description", ParamKind::String, "What this workflow does", false),
                param("jobs", ParamKind::Array, "Array of add_job argument objects", true),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "scheduler.list_jobs".into(),
            description: "List your scheduled jobs and their statuses.".into(),
            parameters: vec![],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "scheduler.cancel_job".into(),
            description: "Cancel an active job by id.".into(),
            parameters: vec![param("job_id", ParamKind::String, "Job id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "scheduler.cancel_workflow".into(),
            description: "Cancel every active job in a workflow.".into(),
            parameters: vec![param("workflow_id", ParamKind::String, "Workflow id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "scheduler.get_workflow_status".into(),
            description: "Status of a workflow and each of its jobs.".into(),
            parameters: vec![param("workflow_id", ParamKind::String, "Workflow id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "scheduler.list_workflows".into(),
            description: "List your workflows.".into(),
            parameters: vec![],
            required_permission: Permission::User,
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn handle(
    state: &AppState,
    user: &User,
    ctx: &UserContext,
    tool_name: &str,
    arguments: Value,
) -> ToolResult {
    let result = match tool_name {
        "scheduler.add_job" => add_job(state, user, ctx, arguments, None).await,
        "scheduler.create_workflow" => create_workflow(state, user, ctx, arguments).await,
        "scheduler.list_jobs" => list_jobs(state, user).await,
        "scheduler.cancel_job" => cancel_job(state, user, arguments).await,
        "scheduler.cancel_workflow" => cancel_workflow(state, user, arguments).await,
        "scheduler.get_workflow_status" => workflow_status(state, user, arguments).await,
        "scheduler.list_workflows" => list_workflows(state, user).await,
        _ => return ToolResult::err(tool_name, "UnknownTool"),
    };
    match result {
        Ok(value) => ToolResult::ok(tool_name, value),
        Err(e) => ToolResult::err(tool_name, e.to_string()),
    }
}

type HandlerResult = swb_domain::error::Result<Value>;

// ── add_job ───────────────────────────────────────────────────────

async fn add_job(
    state: &AppState,
    user: &User,
    ctx: &UserContext,
    arguments: Value,
    workflow_id: Option<Uuid>,
) -> HandlerResult {
    let args: AddJobArgs = serde_json::from_value(arguments)
        .map_err(|e| swb_domain::Error::validation("arguments", e.to_string()))?;
    validation::validate(&args)?;

    let now = Utc::now();
    let next_run_at = match args.job_type {
        JobType::Webhook => Some(webhook_sentinel()),
        JobType::Cron => {
            let config: CronConfig = serde_json::from_value(args.check_config.clone())
                .map_err(|e| swb_domain::Error::validation("check_config", e.to_string()))?;
            let tz = cron::parse_tz(&config.timezone)?;
            cron::next_after(&config.cron_expr, &now, tz)
        }
        JobType::Delay => {
            // First evaluation at the deadline, not one interval in.
            let config: DelayConfig = serde_json::from_value(args.check_config.clone())
                .map_err(|e| swb_domain::Error::validation("check_config", e.to_string()))?;
            Some(now + chrono::Duration::seconds(config.delay_seconds as i64))
        }
        _ => Some(now + chrono::Duration::seconds(args.interval_seconds as i64)),
    };

    let job = ScheduledJob {
        id: Uuid::new_v4(),
        user_id: user.id.clone(),
        workflow_id,
        name: args.name,
        description: args.description,
        job_type: args.job_type,
        check_config: args.check_config,
        interval_seconds: args.interval_seconds,
        max_attempts: args.max_attempts,
        max_runs: args.max_runs,
        expires_at: args.expires_at,
        attempts: 0,
        consecutive_failures: 0,
        runs_completed: 0,
        status: JobStatus::Active,
        next_run_at,
        last_result: None,
        on_success_message: args.on_success_message,
        on_failure_message: args.on_failure_message,
        on_complete: args.on_complete,
        platform_context: PlatformContext {
            platform: ctx.platform.clone(),
            channel: ctx.channel.clone(),
            thread: ctx.thread.clone(),
            conversation_id: if ctx.conversation_id.is_empty() {
                None
            } else {
                Some(ctx.conversation_id.clone())
            },
        },
        result_summary_fields: args.result_summary_fields,
        status_message: None,
        created_at: now,
        completed_at: None,
    };
    let job = state.jobs.insert(job).await;
    tracing::info!(job_id = %job.id, job_type = ?job.job_type, "job created");

    Ok(json!({
        "job_id": job.id,
        "status": job.status,
        "next_run_at": job.next_run_at,
        "webhook_url": matches!(job.job_type, JobType::Webhook)
            .then(|| format!("/webhook/{}", job.id)),
    }))
}

// ── create_workflow ───────────────────────────────────────────────

async fn create_workflow(
    state: &AppState,
    user: &User,
    ctx: &UserContext,
    arguments: Value,
) -> HandlerResult {
    #[derive(serde::Deserialize)]
    struct CreateWorkflowArgs {
        name: String,
        #[serde(default)]
        description: Option<String>,
        jobs: Vec<Value>,
    }

    let args: CreateWorkflowArgs = serde_json::from_value(arguments)
        .map_err(|e| swb_domain::Error::validation("arguments", e.to_string()))?;
    if args.jobs.is_empty() {
        return Err(swb_domain::Error::validation("jobs", "at least one job is required"));
    }

    // Validate every member before creating anything.
    for (i, job_value) in args.jobs.iter().enumerate() {
        let parsed: AddJobArgs = serde_json::from_value(job_value.clone())
            .map_err(|e| swb_domain::Error::validation(format!("jobs[{i}]"), e.to_string()))?;
        validation::validate(&parsed)
            .map_err(|e| swb_domain::Error::validation(format!("jobs[{i}]"), e.to_string()))?;
    }

    let workflow = state
        .jobs
        .insert_workflow(Workflow {
            id: Uuid::new_v4(),
            name: args.name,
            description: args.description,
            user_id: user.id.clone(),
            created_at: Utc::now(),
        })
        .await;

    let mut job_ids = Vec::with_capacity(args.jobs.len());
    for job_value in args.jobs {
        let created = add_job(state, user, ctx, job_value, Some(workflow.id)).await?;
        job_ids.push(created["job_id"].clone());
    }

    tracing::info!(workflow_id = %workflow.id, jobs = job_ids.len(), "workflow created");
    Ok(json!({"workflow_id": workflow.id, "job_ids": job_ids}))
}

// ── queries & cancellation ────────────────────────────────────────

fn job_summary(job: &ScheduledJob) -> Value {
    json!({
        "job_id": job.id,
        "name": job.name,
        "job_type": job.job_type,
        "status": job.status,
        "workflow_id": job.workflow_id,
        "attempts": job.attempts,
        "runs_completed": job.runs_completed,
        "next_run_at": job.next_run_at,
        "status_message": job.status_message,
    })
}

async fn list_jobs(state: &AppState, user: &User) -> HandlerResult {
    let jobs = state.jobs.list_for_user(&user.id).await;
    Ok(json!({"jobs": jobs.iter().map(job_summary).collect::<Vec<_>>()}))
}

async fn cancel_job(state: &AppState, user: &User, arguments: Value) -> HandlerResult {
    let job_id = parse_uuid(&arguments, "job_id")?;
    let job = state
        .jobs
        .get(&job_id)
        .await
        .ok_or_else(|| swb_domain::Error::Permanent(format!("job {job_id} not found")))?;
    require_owner(user, &job.user_id)?;

    match state.jobs.cancel_job(&job_id, "cancelled by user").await {
        Some(job) => Ok(json!({"job_id": job.id, "status": job.status})),
        None => Err(swb_domain::Error::validation(
            "job_id",
            "job is already in a terminal state",
        )),
    }
}

async fn cancel_workflow(state: &AppState, user: &User, arguments: Value) -> HandlerResult {
    let workflow_id = parse_uuid(&arguments, "workflow_id")?;
    let workflow = state
        .jobs
        .get_workflow(&workflow_id)
        .await
        .ok_or_else(|| swb_domain::Error::Permanent(format!("workflow {workflow_id} not found")))?;
    require_owner(user, &workflow.user_id)?;

    let cancelled = state
        .jobs
        .cancel_workflow(workflow_id, "workflow cancelled by user")
        .await;
    Ok(json!({"workflow_id": workflow_id, "cancelled_jobs": cancelled}))
}

async fn workflow_status(state: &AppState, user: &User, arguments: Value) -> HandlerResult {
    let workflow_id = parse_uuid(&arguments, "workflow_id")?;
    let workflow = state
        .jobs
        .get_workflow(&workflow_id)
        .await
        .ok_or_else(|| swb_domain::Error::Permanent(format!("workflow {workflow_id} not found")))?;
    require_owner(user, &workflow.user_id)?;

    let jobs = state.jobs.workflow_jobs(workflow_id).await;
    let status = state.jobs.workflow_status(workflow_id).await;
    Ok(json!({
        "workflow_id": workflow_id,
        "name": workflow.name,
        "status": status,
        "jobs": jobs.iter().map(job_summary).collect::<Vec<_>>(),
    }))
}

async fn list_workflows(state: &AppState, user: &User) -> HandlerResult {
    let workflows = state.jobs.list_workflows_for_user(&user.id).await;
    let mut out = Vec::with_capacity(workflows.len());
    for w in workflows {
        let status = state.jobs.workflow_status(w.id).await;
        out.push(json!({
            "workflow_id": w.id,
            "name": w.name,
            "status": status,
        }));
    }
    Ok(json!({"workflows": out}))
}

// ── Helpers ───────────────────────────────────────────────────────

fn parse_uuid(arguments: &Value, field: &str) -> swb_domain::error::Result<Uuid> {
    arguments
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| swb_domain::Error::validation(field, "expected a UUID"))
}

fn require_owner(user: &User, owner_id: &str) -> swb_domain::error::Result<()> {
    if user.id == owner_id || user.permission >= Permission::Admin {
        Ok(())
    } else {
        Err(swb_domain::Error::Permission(
            "you do not own this resource".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_are_scheduler_prefixed_and_user_gated() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 7);
        for def in &defs {
            assert!(def.name.starts_with("scheduler."), "{}", def.name);
            assert_eq!(def.required_permission, Permission::User);
        }
    }

    #[test]
    fn add_job_schema_marks_required_fields() {
        let defs = tool_definitions();
        let add = defs.iter().find(|d| d.name == "scheduler.add_job").unwrap();
        let schema = add.input_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("job_type")));
        assert!(required.contains(&json!("check_config")));
        assert!(required.contains(&json!("on_success_message")));
    }
}
