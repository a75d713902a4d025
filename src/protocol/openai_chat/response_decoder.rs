use serde::Deserialize;
use serde_json::Value;

use super::{OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiUsage};
use crate::error::RelayError;
use crate::protocol::adapter::invalid_response;
use crate::protocol::{ProviderKind, ProviderResponse, Usage};

/// Normalize a Chat Completions response. The relay's own output uses the same
/// envelope, so both shapes take this path.
pub(crate) fn normalize_response(raw: &Value) -> Result<ProviderResponse, RelayError> {
    let Some(object) = raw.as_object() else {
        return Err(invalid_response(
            ProviderKind::OpenAi,
            "response is not a JSON object",
        ));
    };

    if object.get("choices").is_some_and(Value::is_array) {
        let response = OpenAiChatResponse::deserialize(raw).unwrap_or_else(|err| {
            tracing::debug!("lenient OpenAI response decode after typed decode failed: {err}");
            OpenAiChatResponse {
                id: string_field(raw, "id"),
                model: string_field(raw, "model"),
                choices: object
                    .get("choices")
                    .and_then(|choices| Vec::<OpenAiChoice>::deserialize(choices).ok())
                    .unwrap_or_default(),
                usage: object
                    .get("usage")
                    .and_then(|usage| OpenAiUsage::deserialize(usage).ok()),
            }
        });
        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .map(message_text)
            .unwrap_or_default();
        let usage = response
            .usage
            .map(|usage| Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        return Ok(ProviderResponse::message(
            response.id,
            response.model,
            text,
            usage,
        ));
    }

    if let Some(text) = object.get("content").and_then(Value::as_str) {
        return Ok(ProviderResponse::message(
            string_field(raw, "id"),
            string_field(raw, "model"),
            text,
            None,
        ));
    }

    Err(invalid_response(
        ProviderKind::OpenAi,
        "response has no 'choices' array",
    ))
}

/// Message content is either a string or an array of typed parts.
fn message_text(message: &OpenAiMessage) -> String {
    match message.content.as_ref() {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_vendor_response() {
        let raw = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        });
        let response = normalize_response(&raw).unwrap();
        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.text(), "Hello!");
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn test_content_parts_first_text() {
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": [
                {"type": "image_url", "image_url": {"url": "x"}},
                {"type": "text", "text": "part"}
            ]}}]
        });
        assert_eq!(normalize_response(&raw).unwrap().text(), "part");
    }

    #[test]
    fn test_unrecognized_inner_shape_is_empty() {
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": 42}}]});
        assert_eq!(normalize_response(&raw).unwrap().text(), "");
        let raw = json!({"choices": []});
        assert_eq!(normalize_response(&raw).unwrap().text(), "");
    }

    #[test]
    fn test_null_id_and_model_keep_text() {
        let raw = json!({
            "id": null,
            "model": null,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "still here"}}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        });
        let response = normalize_response(&raw).unwrap();
        assert_eq!(response.text(), "still here");
        assert_eq!(response.id, "");
        assert_eq!(response.usage.unwrap().total_tokens, 3);
    }

    #[test]
    fn test_bare_content_string() {
        let raw = json!({"content": "plain"});
        assert_eq!(normalize_response(&raw).unwrap().text(), "plain");
    }

    #[test]
    fn test_malformed_envelope_fails() {
        assert!(matches!(
            normalize_response(&json!([1, 2])),
            Err(RelayError::InvalidResponseFormat { .. })
        ));
        assert!(matches!(
            normalize_response(&json!({"id": "x"})),
            Err(RelayError::InvalidResponseFormat { .. })
        ));
    }
}
