//! Dot-path lookup into JSON values.
//!
//! Used by the scheduler's condition evaluators (`success_field`) and the
//! message placeholder renderer (`{result.a.b}`).

use serde_json::Value;

/// Resolve a dot-separated path against a JSON value. Array segments may be
/// numeric indexes. Returns `None` when any segment is missing.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON value as bare text: strings without quotes, everything
/// else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        serde_json::json!({
            "status": "completed",
            "result": {"task_id": "T42", "files": ["a.rs", "b.rs"]},
            "count": 3,
        })
    }

    #[test]
    fn lookup_top_level() {
        let v = sample();
        assert_eq!(lookup(&v, "status").unwrap(), "completed");
    }

    #[test]
    fn lookup_nested() {
        let v = sample();
        assert_eq!(lookup(&v, "result.task_id").unwrap(), "T42");
    }

    #[test]
    fn lookup_array_index() {
        let v = sample();
        assert_eq!(lookup(&v, "result.files.1").unwrap(), "b.rs");
    }

    #[test]
    fn lookup_missing_segment() {
        let v = sample();
        assert!(lookup(&v, "result.missing").is_none());
        assert!(lookup(&v, "status.deeper").is_none());
    }

    #[test]
    fn empty_path_returns_root() {
        let v = sample();
        assert_eq!(lookup(&v, "").unwrap(), &v);
    }

    #[test]
    fn render_string_without_quotes() {
        assert_eq!(render(&Value::String("completed".into())), "completed");
    }

    #[test]
    fn render_non_string_as_json() {
        assert_eq!(render(&serde_json::json!({"a": 1})), "{\"a\":1}");
        assert_eq!(render(&serde_json::json!(3)), "3");
    }
}
