use serde_json::Value;

use super::{OpenAiChatRequest, OpenAiMessage, OpenAiStreamOptions};
use crate::error::RelayError;
use crate::protocol::adapter::{encode_body, sendable};
use crate::protocol::models::ModelRegistry;
use crate::protocol::{FormattedRequest, Message, ModelConfig};

/// Extension keys the Chat Completions API understands.
const FORWARDED_EXTENSIONS: [&str; 6] = [
    "reasoning_effort",
    "stop",
    "user",
    "seed",
    "response_format",
    "logit_bias",
];

/// `OpenAI` keeps system prompts inline in the message list.
pub(crate) fn format_request(
    models: &ModelRegistry,
    messages: &[Message],
    config: &ModelConfig,
) -> FormattedRequest {
    FormattedRequest {
        model: config.model.clone(),
        max_tokens: models.clamp_max_tokens(&config.model, config.max_tokens),
        temperature: Some(config.temperature),
        top_p: Some(config.top_p),
        presence_penalty: Some(config.presence_penalty),
        frequency_penalty: Some(config.frequency_penalty),
        stream: config.stream,
        messages: sendable(messages).cloned().collect(),
        system: None,
        extensions: serde_json::Map::new(),
    }
}

pub(crate) fn build_wire_request(request: &FormattedRequest) -> OpenAiChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(OpenAiMessage {
            role: "system".to_string(),
            content: Some(Value::String(system.to_string())),
        });
    }
    messages.extend(request.messages.iter().map(|message| OpenAiMessage {
        role: message.role.as_str().to_string(),
        content: Some(Value::String(message.content.clone())),
    }));

    let mut extra = serde_json::Map::new();
    for key in FORWARDED_EXTENSIONS {
        if let Some(value) = request.extensions.get(key) {
            extra.insert(key.to_string(), value.clone());
        }
    }

    OpenAiChatRequest {
        model: request.model.clone(),
        messages,
        stream: request.stream.then_some(true),
        stream_options: request.stream.then_some(OpenAiStreamOptions {
            include_usage: Some(true),
        }),
        temperature: request.temperature,
        max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
        top_p: request.top_p,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        extra,
    }
}

pub(crate) fn encode_wire_request(request: &FormattedRequest) -> Result<Vec<u8>, RelayError> {
    encode_body(&build_wire_request(request))
}
