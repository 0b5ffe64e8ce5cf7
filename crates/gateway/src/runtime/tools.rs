//! Combined tool surface for the agent loop.
//!
//! The LLM sees one uniform tool list: module tools discovered through the
//! registry plus the built-in `scheduler.*` and `tasks.*` surfaces.
//! Dispatch routes built-ins in-process and everything else over HTTP.

use serde_json::Value;

use swb_domain::manifest::{Permission, ToolDefinition};
use swb_domain::tool::{ToolResult, UserContext};
use swb_modules::CancelToken;

use crate::runtime::users::{Persona, User};
use crate::state::AppState;

use super::{scheduler, supervisor};

/// Module names served in-process rather than over HTTP.
const BUILTIN_MODULES: [&str; 2] = ["scheduler", "tasks"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the tool list for one turn: registry tools filtered by the user's
/// permission and the persona's allowlist, plus built-ins under the same
/// filters. Filtering happens here — excluded tools are invisible to the
/// model.
pub fn build_tool_definitions(
    state: &AppState,
    user: &User,
    persona: Option<&Persona>,
) -> Vec<ToolDefinition> {
    let allowlist = persona.and_then(|p| p.allowed_modules.as_deref());

    let mut defs = state.registry.list_tools(user.permission, allowlist);

    let builtin_allowed = |module: &str| {
        allowlist
            .map(|list| list.iter().any(|m| m == module))
            .unwrap_or(true)
    };
    if builtin_allowed("scheduler") {
        defs.extend(
            scheduler::tools::tool_definitions()
                .into_iter()
                .filter(|d| d.required_permission <= user.permission),
        );
    }
    if builtin_allowed("tasks") {
        defs.extend(
            supervisor::tools::tool_definitions()
                .into_iter()
                .filter(|d| d.required_permission <= user.permission),
        );
    }
    defs
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one tool call with the authoritative user context. Built-in
/// modules are handled in-process; module tools go through the HTTP
/// dispatcher. Never errors — failures come back as `ToolResult`s.
pub async fn dispatch_tool(
    state: &AppState,
    tool_name: &str,
    arguments: Value,
    ctx: &UserContext,
    cancel: Option<&CancelToken>,
) -> ToolResult {
    let module = tool_name.split('.').next().unwrap_or(tool_name);
    if BUILTIN_MODULES.contains(&module) {
        let Some(user) = state.users.get_user(&ctx.user_id).await else {
            return ToolResult::err(tool_name, format!("unknown user {}", ctx.user_id));
        };
        return match module {
            "scheduler" => scheduler::tools::handle(state, &user, ctx, tool_name, arguments).await,
            "tasks" => supervisor::tools::handle(state, &user, ctx, tool_name, arguments).await,
            _ => unreachable!(),
        };
    }
    state
        .dispatcher
        .execute(tool_name, arguments, ctx, cancel)
        .await
}

/// Guard used by the agent loop: a call the model should never have seen
/// (filtered out, or plain unknown) is answered with `UnknownTool` instead
/// of being dispatched.
pub fn is_visible(defs: &[ToolDefinition], tool_name: &str) -> bool {
    defs.iter().any(|d| d.name == tool_name)
}

/// One-line summary of the visible tool surface for the system prompt.
pub fn tool_summary(defs: &[ToolDefinition]) -> String {
    let mut modules: Vec<&str> = defs.iter().map(|d| d.module_name()).collect();
    modules.sort();
    modules.dedup();
    format!(
        "{} tools available from modules: {}",
        defs.len(),
        modules.join(", ")
    )
}

/// Permission floor for calling any tool at all.
pub fn may_use_tools(user: &User) -> bool {
    user.permission >= Permission::User
}
