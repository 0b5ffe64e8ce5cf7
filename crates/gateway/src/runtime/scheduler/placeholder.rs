//! Completion-message placeholder rendering.
//!
//! Substitution only — no expressions. Supported placeholders:
//! `{job_id}`, `{workflow_id}`, `{result}` (optionally projected down to
//! `result_summary_fields`, otherwise truncated compact JSON), and
//! `{result.path.to.field}` dot paths. A placeholder that cannot be
//! resolved renders literally and logs a warning; rendering never fails a
//! dispatch.

use serde_json::Value;

use swb_domain::path;

use super::model::ScheduledJob;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn render(template: &str, job: &ScheduledJob, result: Option<&Value>, limit: usize) -> String {
    let pattern = regex::Regex::new(r"\{([A-Za-z0-9_][A-Za-z0-9_.]*)\}")
        .expect("placeholder pattern is valid");

    pattern
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match resolve(name, job, result, limit) {
                Some(text) => text,
                None => {
                    tracing::warn!(
                        job_id = %job.id,
                        placeholder = %name,
                        "unresolvable placeholder rendered literally"
                    );
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn resolve(name: &str, job: &ScheduledJob, result: Option<&Value>, limit: usize) -> Option<String> {
    match name {
        "job_id" => Some(job.id.to_string()),
        "workflow_id" => job.workflow_id.map(|id| id.to_string()),
        "result" => Some(render_result(job, result?, limit)),
        _ => {
            let field = name.strip_prefix("result.")?;
            let value = path::lookup(result?, field)?;
            Some(path::render(value))
        }
    }
}

/// `{result}`: project to the summary fields when configured (fields
/// missing on the result are omitted), else the full result truncated.
fn render_result(job: &ScheduledJob, result: &Value, limit: usize) -> String {
    let projected: Value = match (&job.result_summary_fields, result) {
        (Some(fields), Value::Object(map)) => {
            let mut out = serde_json::Map::new();
            for field in fields {
                if let Some(v) = map.get(field) {
                    out.insert(field.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        _ => result.clone(),
    };
    let mut text = path::render(&projected);
    if text.chars().count() > limit {
        text = text.chars().take(limit).collect();
        text.push('…');
    }
    text
}
