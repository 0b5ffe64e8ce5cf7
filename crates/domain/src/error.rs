/// Shared error type used across all Switchboard crates.
///
/// Variants map onto the platform's surface kinds: validation errors are
/// never retried, transient errors are retried by the scheduler (never by
/// the agent loop), permanent errors fail a job immediately, and only
/// `Fatal` aborts an in-flight turn.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("permanent: {0}")]
    Permanent(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for a validation error with a field path.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error should be retried with backoff (scheduler policy).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(msg) => !message_is_permanent(msg),
            Error::Timeout(_) => true,
            Error::Provider { message, .. } => message.contains("HTTP 5") || message.contains("429"),
            _ => false,
        }
    }

    /// Whether this error terminates a job without retry.
    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Permanent(_) | Error::UnknownTool(_) => true,
            Error::Http(msg) => message_is_permanent(msg),
            _ => false,
        }
    }
}

/// Error-text heuristics for permanent failures: HTTP 404/410 or the
/// semantic "gone" phrases modules commonly return.
pub fn message_is_permanent(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("http 404")
        || lower.contains("http 410")
        || lower.contains("not found")
        || lower.contains("does not exist")
        || lower.contains("unknown tool")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient() {
        assert!(Error::Timeout("module took too long".into()).is_transient());
        assert!(!Error::Timeout("x".into()).is_permanent());
    }

    #[test]
    fn http_5xx_is_transient() {
        let e = Error::Http("HTTP 503 from module research".into());
        assert!(e.is_transient());
        assert!(!e.is_permanent());
    }

    #[test]
    fn http_404_is_permanent() {
        let e = Error::Http("HTTP 404 from module research".into());
        assert!(e.is_permanent());
        assert!(!e.is_transient());
    }

    #[test]
    fn not_found_text_is_permanent() {
        assert!(message_is_permanent("task does not exist"));
        assert!(message_is_permanent("Tool Not Found"));
        assert!(message_is_permanent("unknown tool: x.y"));
        assert!(!message_is_permanent("connection reset by peer"));
    }

    #[test]
    fn validation_is_neither() {
        let e = Error::validation("check_config.cron_expr", "expected 5 fields");
        assert!(!e.is_transient());
        assert!(!e.is_permanent());
        assert!(e.to_string().contains("check_config.cron_expr"));
    }
}
