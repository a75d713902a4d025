use serde::Deserialize;
use serde_json::Value;

use super::AnthropicResponse;
use crate::error::RelayError;
use crate::protocol::adapter::invalid_response;
use crate::protocol::openai_chat::response_decoder as normalized;
use crate::protocol::{ProviderKind, ProviderResponse, Usage};

/// Normalize a Messages API response, or the relay's own normalized envelope.
pub(crate) fn normalize_response(raw: &Value) -> Result<ProviderResponse, RelayError> {
    let Some(object) = raw.as_object() else {
        return Err(invalid_response(
            ProviderKind::Anthropic,
            "response is not a JSON object",
        ));
    };

    if object.get("choices").is_some_and(Value::is_array) {
        return normalized::normalize_response(raw);
    }

    match object.get("content") {
        Some(Value::Array(_)) => {
            let response = AnthropicResponse::deserialize(raw).unwrap_or_else(|err| {
                tracing::debug!("lenient Anthropic response decode after typed decode failed: {err}");
                AnthropicResponse {
                    id: string_field(raw, "id"),
                    model: string_field(raw, "model"),
                    ..AnthropicResponse::default()
                }
            });
            let text = response
                .content
                .iter()
                .find_map(|block| block.text_value())
                .unwrap_or_default()
                .to_string();
            let usage = response
                .usage
                .map(|usage| Usage::new(usage.input_tokens, usage.output_tokens));
            Ok(ProviderResponse::message(
                response.id,
                response.model,
                text,
                usage,
            ))
        }
        Some(Value::String(text)) => Ok(ProviderResponse::message(
            string_field(raw, "id"),
            string_field(raw, "model"),
            text.as_str(),
            None,
        )),
        _ => Err(invalid_response(
            ProviderKind::Anthropic,
            "response has no 'content' blocks",
        )),
    }
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
