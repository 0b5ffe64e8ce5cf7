//! Shared utility functions for provider adapters.

use swb_domain::config::AuthConfig;
use swb_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Resolve the API key from an [`AuthConfig`].
///
/// Precedence: plaintext `key` field (warn), then the `env` variable.
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key' — prefer 'env' instead"
        );
        return Ok(key.clone());
    }
    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Config(format!(
                "environment variable '{env_var}' not set or not valid UTF-8"
            ))
        });
    }
    Err(Error::Config(
        "no API key configured: set 'key' or 'env' in the provider auth".into(),
    ))
}

/// Build the domain error for a non-2xx provider response.
///
/// The message embeds the status code (and `retry_after=<secs>s` for 429s)
/// so the router can classify transience without a second type.
pub(crate) fn http_status_error(
    provider: &str,
    status: u16,
    retry_after_secs: Option<u64>,
    body: &str,
) -> Error {
    let mut message = format!("HTTP {status}");
    if let Some(secs) = retry_after_secs {
        message.push_str(&format!(" retry_after={secs}s"));
    }
    if !body.is_empty() {
        let preview: String = body.chars().take(300).collect();
        message.push_str(": ");
        message.push_str(&preview);
    }
    Error::Provider {
        provider: provider.to_string(),
        message,
    }
}

/// Extract the `Retry-After` seconds from a provider error message built by
/// [`http_status_error`].
pub(crate) fn parse_retry_after(message: &str) -> Option<u64> {
    let idx = message.find("retry_after=")?;
    let rest = &message[idx + "retry_after=".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Extract the HTTP status code from a provider error message built by
/// [`http_status_error`].
pub(crate) fn parse_status(message: &str) -> Option<u16> {
    let idx = message.find("HTTP ")?;
    let rest = &message[idx + 5..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
