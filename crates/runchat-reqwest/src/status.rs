//! Classification of HTTP responses.

use std::time::Duration;

use reqwest::Response;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;

use crate::TRACING_TARGET;

/// Longest error message taken from a response body.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1024;

/// Passes successful responses through and turns every other status into an error.
pub(crate) async fn check(response: Response) -> runchat_core::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);

    tracing::debug!(
        target: TRACING_TARGET,
        status = status.as_u16(),
        path = url.path(),
        message = message.as_deref(),
        "Request rejected"
    );

    Err(classify(status.as_u16(), message, retry_after))
}

/// Maps a non-success status onto the core error taxonomy.
pub fn classify(
    status: u16,
    message: Option<String>,
    retry_after: Option<Duration>,
) -> runchat_core::Error {
    let error = match status {
        401 => runchat_core::Error::authentication(),
        404 => runchat_core::Error::not_found(),
        429 => {
            let error = runchat_core::Error::rate_limited();
            match retry_after {
                Some(wait) => error.with_retry_after(wait),
                None => error,
            }
        }
        code => runchat_core::Error::http(code),
    };

    let message = message.unwrap_or_else(|| default_message(status).to_owned());
    error.with_message(message)
}

fn default_message(status: u16) -> &'static str {
    match status {
        401 => "Invalid or missing API key",
        403 => "Access denied",
        404 => "Workflow not found",
        429 => "Too many requests",
        500..=599 => "Server error",
        _ => "Request failed",
    }
}

/// Extracts the `error` or `message` field of a JSON body, or the raw body text.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let message = match serde_json::from_str::<Value>(body) {
        Ok(value) => ["error", "message", "detail"]
            .iter()
            .find_map(|key| match value.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                _ => None,
            })?,
        Err(_) if body.starts_with('<') => return None,
        Err(_) => body.to_owned(),
    };

    Some(truncate(message))
}

fn truncate(message: String) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((end, _)) => message[..end].to_owned(),
        None => message,
    }
}
