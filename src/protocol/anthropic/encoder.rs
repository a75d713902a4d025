use serde_json::Value;

use super::{AnthropicMessage, AnthropicRequest};
use crate::error::RelayError;
use crate::protocol::adapter::{encode_body, sendable};
use crate::protocol::models::{ModelRegistry, FALLBACK_MAX_TOKENS};
use crate::protocol::{FormattedRequest, Message, ModelConfig, Role};

/// Extension keys the Messages API understands.
const FORWARDED_EXTENSIONS: [&str; 4] = ["thinking", "metadata", "stop_sequences", "top_k"];

/// Anthropic takes the system prompt in a dedicated slot, never in `messages`.
pub(crate) fn format_request(
    models: &ModelRegistry,
    messages: &[Message],
    config: &ModelConfig,
) -> FormattedRequest {
    let (system, turns) = split_system(sendable(messages));
    FormattedRequest {
        model: config.model.clone(),
        max_tokens: models.clamp_max_tokens(&config.model, config.max_tokens),
        temperature: Some(config.temperature),
        top_p: Some(config.top_p),
        presence_penalty: None,
        frequency_penalty: None,
        stream: config.stream,
        messages: turns,
        system,
        extensions: serde_json::Map::new(),
    }
}

/// Multiple system messages are joined in order with a blank line.
fn split_system<'a>(
    messages: impl Iterator<Item = &'a Message>,
) -> (Option<String>, Vec<Message>) {
    let mut system: Option<String> = None;
    let mut turns = Vec::new();
    for message in messages {
        if message.role == Role::System {
            match system.as_mut() {
                Some(existing) => {
                    existing.push_str("\n\n");
                    existing.push_str(&message.content);
                }
                None => system = Some(message.content.clone()),
            }
        } else {
            turns.push(message.clone());
        }
    }
    (system, turns)
}

fn thinking_enabled(request: &FormattedRequest) -> bool {
    request
        .extension("thinking")
        .and_then(|thinking| thinking.get("type"))
        .and_then(Value::as_str)
        == Some("enabled")
}

pub(crate) fn build_wire_request(request: &FormattedRequest) -> AnthropicRequest {
    // Pre-formatted bodies may still carry inline system turns.
    let (inline_system, turns) = split_system(request.messages.iter());
    let system = match (request.system.clone(), inline_system) {
        (Some(slot), Some(inline)) => Some(format!("{slot}\n\n{inline}")),
        (slot, inline) => slot.or(inline),
    };

    let mut extra = serde_json::Map::new();
    for key in FORWARDED_EXTENSIONS {
        if let Some(value) = request.extensions.get(key) {
            extra.insert(key.to_string(), value.clone());
        }
    }

    // Extended thinking rejects custom sampling parameters.
    let sampling_allowed = !thinking_enabled(request);

    AnthropicRequest {
        model: request.model.clone(),
        max_tokens: if request.max_tokens == 0 {
            FALLBACK_MAX_TOKENS
        } else {
            request.max_tokens
        },
        system: system.filter(|s| !s.trim().is_empty()),
        messages: turns
            .into_iter()
            .map(|message| AnthropicMessage {
                role: match message.role {
                    Role::Assistant => "assistant".to_string(),
                    Role::User | Role::System => "user".to_string(),
                },
                content: Value::String(message.content),
            })
            .collect(),
        stream: request.stream.then_some(true),
        temperature: request.temperature.filter(|_| sampling_allowed),
        top_p: request.top_p.filter(|_| sampling_allowed),
        extra,
    }
}

pub(crate) fn encode_wire_request(request: &FormattedRequest) -> Result<Vec<u8>, RelayError> {
    encode_body(&build_wire_request(request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_extracts_system() {
        let models = ModelRegistry::builtin();
        let messages = vec![
            Message::system("You are terse."),
            Message::user("hi"),
            Message::assistant(" "),
            Message::assistant("hello"),
        ];
        let config = ModelConfig::new("claude-3-7-sonnet-20250219").with_max_tokens(20_000);
        let request = format_request(&models, &messages, &config);
        assert_eq!(request.system.as_deref(), Some("You are terse."));
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages.iter().all(|m| m.role != Role::System));
        assert_eq!(request.max_tokens, 8192);
        assert!(request.presence_penalty.is_none());
    }

    #[test]
    fn test_wire_request_forwards_thinking_and_drops_sampling() {
        let models = ModelRegistry::builtin();
        let mut request = format_request(
            &models,
            &[Message::user("think")],
            &ModelConfig::new("claude-3-7-sonnet-20250219").streaming(true),
        );
        request.set_extension("thinking", json!({"type": "enabled", "budget_tokens": 2048}));
        request.set_extension("seed", json!(1));
        let body: Value = serde_json::from_slice(&encode_wire_request(&request).unwrap()).unwrap();
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert!(body.get("seed").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_wire_request_merges_inline_system() {
        let request = FormattedRequest {
            model: "claude-3-5-sonnet-20241022".into(),
            max_tokens: 0,
            temperature: Some(0.5),
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            stream: false,
            messages: vec![Message::system("inline"), Message::user("q")],
            system: Some("slot".into()),
            extensions: serde_json::Map::new(),
        };
        let wire = build_wire_request(&request);
        assert_eq!(wire.system.as_deref(), Some("slot\n\ninline"));
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.max_tokens, FALLBACK_MAX_TOKENS);
        assert_eq!(wire.temperature, Some(0.5));
    }
}
