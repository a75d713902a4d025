use std::sync::Arc;

use http::HeaderMap;
use serde_json::Value;

use super::anthropic::AnthropicAdapter;
use super::models::ModelRegistry;
use super::openai_chat::OpenAiAdapter;
use super::{FormattedRequest, Message, ModelConfig, ProviderKind, ProviderResponse};
use crate::auth::ApiKey;
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::stream::StreamEvent;

/// Pure translation between the vendor-neutral shapes and one backend's wire
/// format. Implementations perform no I/O.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn id(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Build a vendor-neutral request: blank messages dropped, system prompt
    /// placed per vendor convention, `max_tokens` clamped to the model ceiling.
    fn format_request(&self, messages: &[Message], config: &ModelConfig) -> FormattedRequest;

    /// Normalize a whole vendor (or relay-normalized) response.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidResponseFormat`] when the top-level
    /// envelope is missing.
    fn normalize_response(&self, raw: &Value) -> Result<ProviderResponse, RelayError>;

    /// Assistant text of a whole response.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidResponseFormat`] when the top-level
    /// envelope is missing.
    fn parse_response(&self, raw: &Value) -> Result<String, RelayError> {
        self.normalize_response(raw)
            .map(|response| response.text().to_string())
    }

    /// Classify one decoded stream chunk. Total: unknown shapes yield `None`.
    fn stream_event(&self, chunk: &Value) -> Option<StreamEvent>;

    /// Text carried by one decoded stream chunk, `""` when there is none.
    fn parse_streaming_response(&self, chunk: &Value) -> String {
        match self.stream_event(chunk) {
            Some(StreamEvent::Delta(text)) => text,
            _ => String::new(),
        }
    }

    /// Serialize a formatted request into the vendor's JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the body cannot be encoded.
    fn encode_request(&self, request: &FormattedRequest) -> Result<Vec<u8>, RelayError>;

    /// Path appended to the vendor base URL.
    fn endpoint_path(&self) -> &'static str;

    /// Authentication headers in the vendor's scheme.
    fn auth_headers(&self, key: &ApiKey) -> Result<HeaderMap, RelayError>;
}

/// One adapter per supported backend, shared by `Arc`.
#[derive(Clone)]
pub struct AdapterRegistry {
    openai: Arc<dyn ProviderAdapter>,
    anthropic: Arc<dyn ProviderAdapter>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new(models: Arc<ModelRegistry>, anthropic_version: &str) -> Self {
        Self {
            openai: Arc::new(OpenAiAdapter::new(Arc::clone(&models))),
            anthropic: Arc::new(AnthropicAdapter::new(models, anthropic_version)),
        }
    }

    #[must_use]
    pub fn from_config(config: &AppConfig, models: Arc<ModelRegistry>) -> Self {
        Self::new(models, &config.providers.anthropic.api_version)
    }

    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
        match kind {
            ProviderKind::OpenAi => Arc::clone(&self.openai),
            ProviderKind::Anthropic => Arc::clone(&self.anthropic),
        }
    }
}

/// Iterate messages that carry non-blank content.
pub(crate) fn sendable(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages.iter().filter(|message| !message.is_blank())
}

/// `choices[0].delta.content` of the relay-normalized chunk shape.
pub(crate) fn normalized_delta_text(chunk: &Value) -> Option<&str> {
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

/// `choices[0].message.content` of the relay-normalized response shape.
pub(crate) fn normalized_message_text(raw: &Value) -> Option<&str> {
    raw.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

/// Interpret `{"error": ...}` frames, either a string or `{message, status?, type?}`.
/// Any other value, `null` included, is not an error.
pub(crate) fn error_frame_event(chunk: &Value) -> Option<StreamEvent> {
    let error = chunk
        .get("error")
        .filter(|error| error.is_string() || error.is_object())?;
    if let Some(message) = error.as_str() {
        return Some(StreamEvent::Error {
            status: 500,
            message: message.to_string(),
        });
    }
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("upstream stream error")
        .to_string();
    let status = error
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .unwrap_or_else(|| {
            error
                .get("type")
                .and_then(Value::as_str)
                .map_or(500, status_for_error_type)
        });
    Some(StreamEvent::Error { status, message })
}

/// Map vendor error `type` strings onto HTTP status codes.
#[must_use]
pub fn status_for_error_type(error_type: &str) -> u16 {
    match error_type {
        "invalid_request_error" => 400,
        "authentication_error" => 401,
        "permission_error" => 403,
        "not_found_error" => 404,
        "request_too_large" => 413,
        "rate_limit_error" => 429,
        "insufficient_quota" => 402,
        "overloaded_error" => 529,
        _ => 500,
    }
}

pub(crate) fn invalid_response(provider: ProviderKind, message: impl Into<String>) -> RelayError {
    RelayError::InvalidResponseFormat {
        provider,
        message: message.into(),
    }
}

pub(crate) fn encode_body<T: serde::Serialize>(body: &T) -> Result<Vec<u8>, RelayError> {
    serde_json::to_vec(body)
        .map_err(|err| RelayError::InvalidRequest(format!("failed to encode request: {err}")))
}
