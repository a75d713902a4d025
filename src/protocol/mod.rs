pub mod adapter;
pub mod anthropic;
pub mod models;
pub mod openai_chat;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::config::CapabilityConfigs;
use crate::error::RelayError;

pub use adapter::{AdapterRegistry, ProviderAdapter};
pub use models::{ModelRegistry, ModelSpec};

/// Backend family a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::OpenAi, ProviderKind::Anthropic];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            other => Err(RelayError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Empty or whitespace-only messages are never sent upstream.
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_top_p() -> f64 {
    1.0
}

/// Per-conversation generation settings chosen by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    /// `0` means "use the model's default".
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "CapabilityConfigs::is_empty")]
    pub capabilities: CapabilityConfigs,
}

impl ModelConfig {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 0,
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stream: false,
            capabilities: CapabilityConfigs::default(),
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Vendor-neutral, wire-ready request.
///
/// `extensions` is a free-form area that capability middleware may populate;
/// adapters forward the keys their vendor understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedRequest {
    pub model: String,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

impl FormattedRequest {
    #[must_use]
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    pub fn set_extension(&mut self, key: impl Into<String>, value: Value) {
        self.extensions.insert(key.into(), value);
    }
}

/// Assistant text inside a normalized choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceContent {
    #[serde(default)]
    pub content: String,
}

/// One normalized choice: `message` for whole responses, `delta` for chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChoiceContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChoiceContent>,
}

/// Token accounting reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Relay-normalized response, the unit response middleware operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ProviderResponse {
    /// A whole (non-streamed) response carrying `text`.
    #[must_use]
    pub fn message(
        id: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choices: vec![Choice {
                message: Some(ChoiceContent {
                    content: text.into(),
                }),
                delta: None,
            }],
            usage,
        }
    }

    /// A streamed chunk `{choices:[{delta:{content}}]}`.
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: None,
                delta: Some(ChoiceContent {
                    content: text.into(),
                }),
            }],
            ..Self::default()
        }
    }

    /// Text of the first choice, preferring `delta` over `message`.
    #[must_use]
    pub fn text(&self) -> &str {
        let Some(choice) = self.choices.first() else {
            return "";
        };
        choice
            .delta
            .as_ref()
            .or(choice.message.as_ref())
            .map_or("", |content| content.content.as_str())
    }

    /// Replace the text of the first choice in whichever slot it occupies.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.choices.first_mut() {
            Some(choice) => {
                if let Some(delta) = choice.delta.as_mut() {
                    delta.content = text;
                } else if let Some(message) = choice.message.as_mut() {
                    message.content = text;
                } else {
                    choice.delta = Some(ChoiceContent { content: text });
                }
            }
            None => *self = Self::delta(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(
            "OpenAI".parse::<ProviderKind>().unwrap(),
            ProviderKind::OpenAi
        );
        assert_eq!(
            "anthropic".parse::<ProviderKind>().unwrap(),
            ProviderKind::Anthropic
        );
        assert!(matches!(
            "gemini".parse::<ProviderKind>(),
            Err(RelayError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_formatted_request_extensions_flatten() {
        let raw = json!({
            "model": "claude-3-7-sonnet-20250219",
            "max_tokens": 1024,
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "enabled", "budget_tokens": 512}
        });
        let request: FormattedRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.extension("thinking").unwrap()["budget_tokens"], 512);
        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["thinking"]["type"], "enabled");
        assert!(back.get("system").is_none());
    }

    #[test]
    fn test_model_config_defaults() {
        let config: ModelConfig = serde_json::from_value(json!({"model": "gpt-4o"})).unwrap();
        assert_eq!(config.max_tokens, 0);
        assert!((config.temperature - 0.7).abs() < f64::EPSILON);
        assert!(!config.stream);
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn test_response_text_prefers_delta() {
        let mut response = ProviderResponse::delta("abc");
        assert_eq!(response.text(), "abc");
        response.set_text("xyz");
        assert_eq!(response.text(), "xyz");
        let whole = ProviderResponse::message("id-1", "gpt-4o", "done", None);
        assert_eq!(whole.text(), "done");
        assert_eq!(ProviderResponse::default().text(), "");
    }

    #[test]
    fn test_delta_wire_shape() {
        let value = serde_json::to_value(ProviderResponse::delta("Hi")).unwrap();
        assert_eq!(value, json!({"choices": [{"delta": {"content": "Hi"}}]}));
    }
}
