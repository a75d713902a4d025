use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use serde_json::Value;

use crate::error::{classify_upstream_status, RelayError};

pub(crate) const RETRY_AFTER_MAX_SECS: u64 = 30;
const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// Delay advertised by a `Retry-After` header, in seconds or as an HTTP date,
/// capped at [`RETRY_AFTER_MAX_SECS`].
#[inline]
pub(crate) fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds.min(RETRY_AFTER_MAX_SECS)));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(Duration::from_secs(RETRY_AFTER_MAX_SECS)))
}

/// Best human-readable message from an upstream error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"message": ..}`; anything else is returned as truncated text.
pub(crate) fn extract_error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let message = match value.get("error") {
            Some(Value::String(message)) => Some(message.as_str()),
            Some(error) => error.get("message").and_then(Value::as_str),
            None => value.get("message").and_then(Value::as_str),
        };
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty error body".to_string();
    }
    text.chars().take(ERROR_BODY_PREVIEW_CHARS).collect()
}

/// Classify a non-2xx upstream reply from its status, headers and body.
pub(crate) fn upstream_error(
    status: http::StatusCode,
    headers: &http::HeaderMap,
    body: &[u8],
) -> RelayError {
    let retry_after = parse_retry_after_delay(headers).map(|delay| delay.as_secs());
    let mut message = extract_error_message(body);
    // Quota markers often live in the error code rather than the message.
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let code = value
            .get("error")
            .and_then(|error| error.get("code").or_else(|| error.get("type")))
            .and_then(Value::as_str);
        if let Some(code) = code.filter(|code| *code == "insufficient_quota") {
            message = format!("{code}: {message}");
        }
    }
    classify_upstream_status(status.as_u16(), message, retry_after)
}
