use serde_json::json;

use crate::protocol::ProviderKind;

/// Error type shared by the relay server, the adapters and the submission
/// orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("No API key found for {0}")]
    MissingApiKey(ProviderKind),
    #[error("Invalid response format from {provider}: {message}")]
    InvalidResponseFormat {
        provider: ProviderKind,
        message: String,
    },
    #[error("Upstream rate limited: {message}")]
    UpstreamRateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("Upstream rejected endpoint or model: status={status}, message={message}")]
    UpstreamBadRequest { status: u16, message: String },
    #[error("Upstream quota exceeded: {0}")]
    UpstreamQuotaExceeded(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Capability '{capability}' middleware failed: {message}")]
    Middleware { capability: String, message: String },
    #[error("A generation is already in flight for conversation {0}")]
    SubmissionInFlight(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category used for status code selection and user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    RateLimit,
    QuotaExceeded,
    BadEndpoint,
    InvalidResponse,
    Transient,
    Conflict,
    Cancelled,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid_request_error",
            ErrorCategory::Authentication => "authentication_error",
            ErrorCategory::RateLimit => "rate_limit_error",
            ErrorCategory::QuotaExceeded => "insufficient_quota",
            ErrorCategory::BadEndpoint => "not_found_error",
            ErrorCategory::InvalidResponse => "invalid_response_error",
            ErrorCategory::Transient => "api_error",
            ErrorCategory::Conflict => "conflict_error",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal_error",
        }
    }
}

const QUOTA_MARKERS: [&str; 3] = ["insufficient_quota", "quota", "billing"];

/// Classify a non-2xx upstream reply by status code (and body hints for quota).
#[must_use]
pub fn classify_upstream_status(
    status: u16,
    message: String,
    retry_after_secs: Option<u64>,
) -> RelayError {
    let lowered = message.to_ascii_lowercase();
    let quota_hint = QUOTA_MARKERS.iter().any(|marker| lowered.contains(marker));
    match status {
        402 => RelayError::UpstreamQuotaExceeded(message),
        429 if quota_hint => RelayError::UpstreamQuotaExceeded(message),
        429 => RelayError::UpstreamRateLimited {
            message,
            retry_after_secs,
        },
        404 | 405 => RelayError::UpstreamBadRequest { status, message },
        _ => RelayError::Upstream { status, message },
    }
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) | RelayError::UnsupportedProvider(_) => {
                ErrorCategory::InvalidRequest
            }
            RelayError::MissingApiKey(_) => ErrorCategory::Authentication,
            RelayError::InvalidResponseFormat { .. } => ErrorCategory::InvalidResponse,
            RelayError::UpstreamRateLimited { .. } => ErrorCategory::RateLimit,
            RelayError::UpstreamQuotaExceeded(_) => ErrorCategory::QuotaExceeded,
            RelayError::UpstreamBadRequest { .. } => ErrorCategory::BadEndpoint,
            RelayError::Upstream { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                500..=599 => ErrorCategory::Transient,
                _ => ErrorCategory::InvalidRequest,
            },
            RelayError::Transport(_) | RelayError::Timeout(_) => ErrorCategory::Transient,
            RelayError::Cancelled => ErrorCategory::Cancelled,
            RelayError::SubmissionInFlight(_) => ErrorCategory::Conflict,
            RelayError::Config(_) | RelayError::Middleware { .. } | RelayError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Network failures, 5xx replies and cancellation share the transport family.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Cancelled
        )
    }

    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            RelayError::MissingApiKey(_) | RelayError::InvalidRequest(_) => {
                http::StatusCode::BAD_REQUEST
            }
            RelayError::UnsupportedProvider(_) => http::StatusCode::NOT_FOUND,
            RelayError::UpstreamRateLimited { .. } => http::StatusCode::TOO_MANY_REQUESTS,
            RelayError::UpstreamQuotaExceeded(_) => http::StatusCode::PAYMENT_REQUIRED,
            RelayError::UpstreamBadRequest { status, .. } | RelayError::Upstream { status, .. } => {
                http::StatusCode::from_u16(*status).unwrap_or(http::StatusCode::BAD_GATEWAY)
            }
            RelayError::InvalidResponseFormat { .. } | RelayError::Transport(_) => {
                http::StatusCode::BAD_GATEWAY
            }
            RelayError::Timeout(_) => http::StatusCode::GATEWAY_TIMEOUT,
            RelayError::SubmissionInFlight(_) => http::StatusCode::CONFLICT,
            RelayError::Cancelled
            | RelayError::Config(_)
            | RelayError::Middleware { .. }
            | RelayError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// One human-readable sentence for the conversation's error slot.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            RelayError::MissingApiKey(provider) => format!(
                "No API key found for {}. Please add your API key in settings.",
                provider.display_name()
            ),
            RelayError::UpstreamRateLimited {
                retry_after_secs: Some(secs),
                ..
            } => format!("The provider is rate limiting requests. Try again in {secs} seconds."),
            RelayError::UpstreamRateLimited { .. } => {
                "The provider is rate limiting requests. Please wait and try again.".to_string()
            }
            RelayError::UpstreamQuotaExceeded(_) => {
                "Your provider quota is exhausted. Check your plan and billing details.".to_string()
            }
            RelayError::UpstreamBadRequest { .. } => {
                "The selected model or endpoint was not found. Check the model name.".to_string()
            }
            RelayError::Upstream { status, message } if (500..=599).contains(status) => {
                format!("The provider is temporarily unavailable ({status}): {message}")
            }
            RelayError::Upstream { status, message } => {
                format!("API Error ({status}): {message}")
            }
            RelayError::Transport(message) => format!("Network error: {message}"),
            RelayError::Timeout(secs) => {
                format!("The provider did not respond within {secs} seconds.")
            }
            RelayError::InvalidResponseFormat { provider, .. } => {
                format!("Received an unreadable response from {provider}.")
            }
            other => other.to_string(),
        }
    }

    /// Message without the variant prefix, forwarded in mid-stream error frames
    /// so the receiving side can classify it again.
    #[must_use]
    pub fn detail_message(&self) -> String {
        match self {
            RelayError::UpstreamRateLimited { message, .. }
            | RelayError::UpstreamBadRequest { message, .. }
            | RelayError::UpstreamQuotaExceeded(message)
            | RelayError::Upstream { message, .. }
            | RelayError::Transport(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Build the `{error, status?, type?, details?}` body served for non-2xx replies.
    #[must_use]
    pub fn to_json_body(&self) -> serde_json::Value {
        let status = self.status_code();
        let mut body = json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "type": self.category().as_str(),
        });
        if let RelayError::UpstreamRateLimited {
            retry_after_secs: Some(secs),
            ..
        } = self
        {
            body["details"] = json!({ "retry_after_secs": secs });
        }
        body
    }
}

/// Format an error as `(status_code, JSON body)`.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    (err.status_code(), err.to_json_body())
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_status() {
        assert!(matches!(
            classify_upstream_status(429, "slow down".into(), Some(3)),
            RelayError::UpstreamRateLimited {
                retry_after_secs: Some(3),
                ..
            }
        ));
        assert!(matches!(
            classify_upstream_status(404, "no such model".into(), None),
            RelayError::UpstreamBadRequest { status: 404, .. }
        ));
        assert!(matches!(
            classify_upstream_status(405, String::new(), None),
            RelayError::UpstreamBadRequest { status: 405, .. }
        ));
        assert!(matches!(
            classify_upstream_status(429, "You exceeded your current quota".into(), None),
            RelayError::UpstreamQuotaExceeded(_)
        ));
        let err = classify_upstream_status(503, "overloaded".into(), None);
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.is_transport());
    }

    #[test]
    fn test_cancelled_is_transport_family() {
        assert!(RelayError::Cancelled.is_transport());
        assert!(!RelayError::MissingApiKey(ProviderKind::OpenAi).is_transport());
    }

    #[test]
    fn test_json_body_shape() {
        let err = RelayError::UpstreamRateLimited {
            message: "too many".into(),
            retry_after_secs: Some(7),
        };
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["status"], 429);
        assert_eq!(body["type"], "rate_limit_error");
        assert_eq!(body["details"]["retry_after_secs"], 7);
        assert!(body["error"].as_str().unwrap().contains("too many"));
    }

    #[test]
    fn test_user_message_for_missing_key_names_provider() {
        let msg = RelayError::MissingApiKey(ProviderKind::Anthropic).user_message();
        assert!(msg.starts_with("No API key found for Anthropic."));
    }
}
