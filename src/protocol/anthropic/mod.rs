pub mod encoder;
pub mod response_decoder;
pub mod stream;

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::adapter::ProviderAdapter;
use super::models::ModelRegistry;
use super::{FormattedRequest, Message, ModelConfig, ProviderKind, ProviderResponse};
use crate::auth::ApiKey;
use crate::error::RelayError;
use crate::stream::StreamEvent;

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");
const ANTHROPIC_VERSION: HeaderName = HeaderName::from_static("anthropic-version");

/// Anthropic Messages API request wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Anthropic message wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: Value,
}

/// Anthropic Messages API response wire type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// A content block in a response or a `content_block_start` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicContentBlock {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl AnthropicContentBlock {
    #[must_use]
    pub fn text_value(&self) -> Option<&str> {
        match self.type_.as_deref() {
            None | Some("text") => self.text.as_deref(),
            Some(_) => None,
        }
    }
}

/// Anthropic usage.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Anthropic SSE stream event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AnthropicStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart {},
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        #[serde(default)]
        content_block: AnthropicContentBlock,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta {
        #[serde(default)]
        delta: AnthropicDelta,
    },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {},
    #[serde(rename = "message_delta")]
    MessageDelta {},
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "ping")]
    Ping {},
    #[serde(other)]
    Unknown,
}

/// Delta body of a `content_block_delta` event.
///
/// `text_delta` carries `text`; `thinking_delta` and `input_json_delta` carry
/// other fields and contribute no assistant text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicDelta {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl AnthropicDelta {
    #[must_use]
    pub fn text_value(&self) -> Option<&str> {
        match self.type_.as_deref() {
            None | Some("text_delta") => self.text.as_deref(),
            Some(_) => None,
        }
    }
}

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    models: Arc<ModelRegistry>,
    api_version: HeaderValue,
}

impl AnthropicAdapter {
    #[must_use]
    pub fn new(models: Arc<ModelRegistry>, api_version: &str) -> Self {
        let api_version = HeaderValue::from_str(api_version.trim()).unwrap_or_else(|_| {
            tracing::warn!(
                "invalid anthropic api_version '{api_version}', using {DEFAULT_ANTHROPIC_VERSION}"
            );
            HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION)
        });
        Self {
            models,
            api_version,
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn format_request(&self, messages: &[Message], config: &ModelConfig) -> FormattedRequest {
        encoder::format_request(&self.models, messages, config)
    }

    fn normalize_response(&self, raw: &Value) -> Result<ProviderResponse, RelayError> {
        response_decoder::normalize_response(raw)
    }

    fn stream_event(&self, chunk: &Value) -> Option<StreamEvent> {
        stream::chunk_to_event(chunk)
    }

    fn encode_request(&self, request: &FormattedRequest) -> Result<Vec<u8>, RelayError> {
        encoder::encode_wire_request(request)
    }

    fn endpoint_path(&self) -> &'static str {
        "/v1/messages"
    }

    fn auth_headers(&self, key: &ApiKey) -> Result<HeaderMap, RelayError> {
        let mut headers = HeaderMap::with_capacity(2);
        let mut value = HeaderValue::from_str(key.expose())
            .map_err(|_| RelayError::InvalidRequest("API key contains invalid characters".into()))?;
        value.set_sensitive(true);
        headers.insert(X_API_KEY, value);
        headers.insert(ANTHROPIC_VERSION, self.api_version.clone());
        Ok(headers)
    }
}
