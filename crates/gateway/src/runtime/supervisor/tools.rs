//! The supervisor's tool surface (`tasks.*`).
//!
//! Handled in-process like the scheduler tools. Workspace and git
//! operations run against the task's workspace directory with path
//! traversal confined to it.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use uuid::Uuid;

use swb_domain::error::{Error, Result};
use swb_domain::manifest::{ParamKind, Permission, ToolDefinition, ToolParameter};
use swb_domain::tool::{ToolResult, UserContext};

use super::model::{TaskMode, TaskRecord, TaskStatus};
use super::runner::{self, StartTaskArgs};
use crate::runtime::scheduler::model::PlatformContext;
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

fn mode_param() -> ToolParameter {
    ToolParameter {
        name: "mode".into(),
        kind: ParamKind::String,
        description: "plan pauses for approval; execute carries the work out".into(),
        required: false,
        allowed_values: Some(vec!["plan".into(), "execute".into()]),
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "tasks.run_task".into(),
            description: "Start a long-running coding task in an isolated container with its \
                          own workspace. Returns immediately with the task id."
                .into(),
            parameters: vec![
                param("prompt", ParamKind::String, "What the task should do", true),
                mode_param(),
                param("timeout_seconds", ParamKind::Integer, "Wall-clock limit (default 1800)", false),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.continue_task".into(),
            description: "Continue a paused or finished task in the same workspace. Creates a \
                          new task chained to the prior one."
                .into(),
            parameters: vec![
                param("task_id", ParamKind::String, "Task to continue", true),
                param("prompt", ParamKind::String, "Follow-up instruction", false),
                mode_param(),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.task_status".into(),
            description: "Current status of a task.".into(),
            parameters: vec![param("task_id", ParamKind::String, "Task id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.task_logs".into(),
            description: "Read task logs: the last `tail` lines, or a slice from `offset`.".into(),
            parameters: vec![
                param("task_id", ParamKind::String, "Task id", true),
                param("tail", ParamKind::Integer, "Last N lines (default 50)", false),
                param("offset", ParamKind::Integer, "Line offset to read from", false),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.cancel_task".into(),
            description: "Cancel a running task. Logs are preserved.".into(),
            parameters: vec![param("task_id", ParamKind::String, "Task id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.list_tasks".into(),
            description: "List your tasks, optionally filtered by status.".into(),
            parameters: vec![param("status", ParamKind::String, "Status filter", false)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.get_task_chain".into(),
            description: "The continuation chain of a task, oldest first.".into(),
            parameters: vec![param("task_id", ParamKind::String, "Task id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.browse_workspace".into(),
            description: "List files under a path in the task's workspace.".into(),
            parameters: vec![
                param("task_id", ParamKind::String, "Task id", true),
                param("path", ParamKind::String, "Relative path (default root)", false),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.read_workspace_file".into(),
            description: "Read a file from the task's workspace (bounded).".into(),
            parameters: vec![
                param("task_id", ParamKind::String, "Task id", true),
                param("path", ParamKind::String, "Relative file path", true),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.git_status".into(),
            description: "git status of the task workspace.".into(),
            parameters: vec![param("task_id", ParamKind::String, "Task id", true)],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.git_push".into(),
            description: "Push the task workspace's commits.".into(),
            parameters: vec![
                param("task_id", ParamKind::String, "Task id", true),
                param("remote", ParamKind::String, "Remote (default origin)", false),
                param("branch", ParamKind::String, "Branch (default current)", false),
            ],
            required_permission: Permission::User,
        },
        ToolDefinition {
            name: "tasks.get_task_container".into(),
            description: "The container backing a task and its liveness.".into(),
            parameters: vec![param("task_id", ParamKind::String, "Task id", true)],
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
        "tasks.run_task" => run_task(state, user, ctx, arguments).await,
        "tasks.continue_task" => continue_task(state, user, arguments).await,
        "tasks.task_status" => task_status(state, user, arguments).await,
        "tasks.task_logs" => task_logs(state, user, arguments).await,
        "tasks.cancel_task" => cancel(state, user, arguments).await,
        "tasks.list_tasks" => list_tasks(state, user, arguments).await,
        "tasks.get_task_chain" => task_chain(state, user, arguments).await,
        "tasks.browse_workspace" => browse_workspace(state, user, arguments).await,
        "tasks.read_workspace_file" => read_workspace_file(state, user, arguments).await,
        "tasks.git_status" => git_status(state, user, arguments).await,
        "tasks.git_push" => git_push(state, user, arguments).await,
        "tasks.get_task_container" => task_container(state, user, arguments).await,
        _ => return ToolResult::err(tool_name, "UnknownTool"),
    };
    match result {
        Ok(value) => ToolResult::ok(tool_name, value),
        Err(e) => ToolResult::err(tool_name, e.to_string()),
    }
}

fn parse_mode(arguments: &Value) -> Result<TaskMode> {
    match arguments.get("mode").and_then(|v| v.as_str()) {
        None | Some("execute") => Ok(TaskMode::Execute),
        Some("plan") => Ok(TaskMode::Plan),
        Some(other) => Err(Error::validation("mode", format!("unknown mode '{other}'"))),
    }
}

fn parse_task_id(arguments: &Value) -> Result<Uuid> {
    arguments
        .get("task_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::validation("task_id", "expected a UUID"))
}

fn owned_task(state: &AppState, user: &User, task_id: &Uuid) -> Result<TaskRecord> {
    let task = state
        .tasks
        .get(task_id)
        .ok_or_else(|| Error::Permanent(format!("task {task_id} not found")))?;
    if task.owner_user_id != user.id && user.permission < Permission::Admin {
        return Err(Error::Permission("you do not own this task".into()));
    }
    Ok(task)
}

fn task_summary(task: &TaskRecord) -> Value {
    json!({
        "task_id": task.id,
        "status": task.status,
        "mode": task.mode,
        "parent_task_id": task.parent_task_id,
        "created_at": task.created_at,
        "started_at": task.started_at,
        "finished_at": task.finished_at,
        "exit_code": task.exit_code,
        "error": task.error,
        "log_offset": task.log_offset,
    })
}

// ── Lifecycle ─────────────────────────────────────────────────────

async fn run_task(
    state: &AppState,
    user: &User,
    ctx: &UserContext,
    arguments: Value,
) -> Result<Value> {
    let prompt = arguments
        .get("prompt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("prompt", "required"))?
        .to_string();
    let mode = parse_mode(&arguments)?;
    let timeout_seconds = arguments.get("timeout_seconds").and_then(|v| v.as_u64());

    let platform_context = PlatformContext {
        platform: ctx.platform.clone(),
        channel: ctx.channel.clone(),
        thread: ctx.thread.clone(),
        conversation_id: if ctx.conversation_id.is_empty() {
            None
        } else {
            Some(ctx.conversation_id.clone())
        },
    };
    let task = runner::start_task(
        state,
        &user.id,
        platform_context,
        StartTaskArgs {
            prompt,
            mode,
            timeout_seconds,
        },
    )
    .await?;
    Ok(json!({"task_id": task.id, "status": task.status, "workspace": task.workspace_path}))
}

async fn continue_task(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task_id = parse_task_id(&arguments)?;
    let prompt = arguments
        .get("prompt")
        .and_then(|v| v.as_str())
        .map(String::from);
    let mode = parse_mode(&arguments)?;
    let child = runner::continue_task(state, &user.id, task_id, prompt, mode).await?;
    Ok(json!({"task_id": child.id, "parent_task_id": child.parent_task_id, "status": child.status}))
}

async fn task_status(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    Ok(task_summary(&task))
}

async fn task_logs(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let lines = match arguments.get("offset").and_then(|v| v.as_u64()) {
        Some(offset) => {
            let limit = arguments
                .get("tail")
                .and_then(|v| v.as_u64())
                .unwrap_or(200) as usize;
            state.logs.tail(&task.id, offset, limit)
        }
        None => {
            let tail = arguments.get("tail").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
            state.logs.last(&task.id, tail)
        }
    };
    Ok(json!({
        "task_id": task.id,
        "total_lines": state.logs.line_count(&task.id),
        "lines": lines,
    }))
}

async fn cancel(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let cancelled = runner::cancel_task(state, &task.id).await?;
    Ok(json!({"task_id": cancelled.id, "status": cancelled.status}))
}

async fn list_tasks(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let status = match arguments.get("status").and_then(|v| v.as_str()) {
        Some(s) => Some(
            serde_json::from_value::<TaskStatus>(Value::String(s.to_string()))
                .map_err(|_| Error::validation("status", format!("unknown status '{s}'")))?,
        ),
        None => None,
    };
    let tasks = state.tasks.list(Some(&user.id), status);
    Ok(json!({"tasks": tasks.iter().map(task_summary).collect::<Vec<_>>()}))
}

async fn task_chain(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let chain = state.tasks.chain(&task.id);
    Ok(json!({"chain": chain.iter().map(task_summary).collect::<Vec<_>>()}))
}

async fn task_container(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let Some(container_ref) = &task.container_ref else {
        return Ok(json!({"task_id": task.id, "container": null}));
    };
    let liveness = state.containers.inspect(container_ref).await.ok();
    Ok(json!({
        "task_id": task.id,
        "container": container_ref,
        "running": liveness.map(|s| s.running),
        "exit_code": liveness.and_then(|s| s.exit_code),
    }))
}

// ── Workspace access ──────────────────────────────────────────────

const MAX_FILE_READ_BYTES: u64 = 256 * 1024;

/// Resolve a user-supplied relative path inside the workspace, refusing
/// anything that escapes it.
fn workspace_path(task: &TaskRecord, relative: &str) -> Result<PathBuf> {
    let relative = relative.trim_start_matches('/');
    let candidate = task.workspace_path.join(relative);
    let normalized = normalize(&candidate);
    if !normalized.starts_with(normalize(&task.workspace_path)) {
        return Err(Error::Permission(
            "path escapes the task workspace".into(),
        ));
    }
    Ok(normalized)
}

/// Lexical normalization (`.` and `..` removal) without touching the
/// filesystem, so traversal is rejected even for paths that don't exist.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

async fn browse_workspace(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let relative = arguments.get("path").and_then(|v| v.as_str()).unwrap_or("");
    let dir = workspace_path(&task, relative)?;

    let mut entries = Vec::new();
    let read = std::fs::read_dir(&dir).map_err(|e| Error::Io(e))?;
    for entry in read.flatten() {
        let meta = entry.metadata().ok();
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "is_dir": meta.as_ref().map(|m| m.is_dir()).unwrap_or(false),
            "size": meta.map(|m| m.len()),
        }));
    }
    entries.sort_by(|a, b| {
        a["name"]
            .as_str()
            .unwrap_or("")
            .cmp(b["name"].as_str().unwrap_or(""))
    });
    Ok(json!({"path": relative, "entries": entries}))
}

async fn read_workspace_file(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let relative = arguments
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("path", "required"))?;
    let path = workspace_path(&task, relative)?;

    let meta = std::fs::metadata(&path).map_err(Error::Io)?;
    if meta.len() > MAX_FILE_READ_BYTES {
        return Err(Error::validation(
            "path",
            format!("file is {} bytes; limit is {MAX_FILE_READ_BYTES}", meta.len()),
        ));
    }
    let content = std::fs::read_to_string(&path).map_err(Error::Io)?;
    Ok(json!({"path": relative, "content": content}))
}

// ── Git operations ────────────────────────────────────────────────

async fn run_git(workspace: &Path, args: &[&str]) -> Result<(bool, String)> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(workspace)
        .output()
        .await
        .map_err(|e| Error::Http(format!("failed to run git: {e}")))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    Ok((output.status.success(), text))
}

async fn git_status(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let (ok, output) = run_git(&task.workspace_path, &["status", "--short", "--branch"]).await?;
    if !ok {
        return Err(Error::Http(format!("git status failed: {output}")));
    }
    Ok(json!({"task_id": task.id, "status": output}))
}

async fn git_push(state: &AppState, user: &User, arguments: Value) -> Result<Value> {
    let task = owned_task(state, user, &parse_task_id(&arguments)?)?;
    let remote = arguments
        .get("remote")
        .and_then(|v| v.as_str())
        .unwrap_or("origin");
    let mut args = vec!["push", remote];
    if let Some(branch) = arguments.get("branch").and_then(|v| v.as_str()) {
        args.push(branch);
    }
    let (ok, output) = run_git(&task.workspace_path, &args).await?;
    if !ok {
        return Err(Error::Http(format!("git push failed: {output}")));
    }
    Ok(json!({"task_id": task.id, "output": output}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_the_task_surface() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        for expected in [
            "tasks.run_task",
            "tasks.continue_task",
            "tasks.task_status",
            "tasks.task_logs",
            "tasks.cancel_task",
            "tasks.list_tasks",
            "tasks.get_task_chain",
            "tasks.browse_workspace",
            "tasks.read_workspace_file",
            "tasks.git_status",
            "tasks.git_push",
            "tasks.get_task_container",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn workspace_path_confines_traversal() {
        let task = TaskRecord::new(
            "u1",
            "x",
            "/data/workspaces/t1".into(),
            TaskMode::Execute,
            60,
            Default::default(),
        );
        assert!(workspace_path(&task, "src/main.rs").is_ok());
        assert!(workspace_path(&task, "/src/main.rs").is_ok());
        assert!(workspace_path(&task, "../other-task/secrets").is_err());
        assert!(workspace_path(&task, "a/../../escape").is_err());
        // `..` that stays inside the workspace is fine.
        assert!(workspace_path(&task, "a/../b").is_ok());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(parse_mode(&json!({})).unwrap(), TaskMode::Execute);
        assert_eq!(parse_mode(&json!({"mode": "plan"})).unwrap(), TaskMode::Plan);
        assert!(parse_mode(&json!({"mode": "yolo"})).is_err());
    }
}
