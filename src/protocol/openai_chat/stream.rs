use serde::Deserialize;
use serde_json::Value;

use super::OpenAiStreamChunk;
use crate::protocol::adapter::{error_frame_event, normalized_delta_text};
use crate::stream::StreamEvent;

/// Classify one Chat Completions stream chunk.
///
/// The first chunk usually carries only `delta.role` and maps to
/// [`StreamEvent::Start`]; a chunk with `finish_reason` and no text maps to
/// [`StreamEvent::Stop`]. Usage-only trailer chunks carry no event.
pub(crate) fn chunk_to_event(chunk: &Value) -> Option<StreamEvent> {
    if let Some(event) = error_frame_event(chunk) {
        return Some(event);
    }

    if chunk.get("choices").is_some() {
        let Ok(parsed) = OpenAiStreamChunk::deserialize(chunk) else {
            return normalized_delta_text(chunk)
                .filter(|text| !text.is_empty())
                .map(|text| StreamEvent::Delta(text.to_string()));
        };
        let choice = parsed.choices.first()?;
        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            return Some(StreamEvent::Delta(text.to_string()));
        }
        if choice.finish_reason.is_some() {
            return Some(StreamEvent::Stop);
        }
        if choice.delta.role.is_some() {
            return Some(StreamEvent::Start);
        }
        return None;
    }

    chunk
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(|text| StreamEvent::Delta(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_chunk_is_start() {
        let chunk = json!({
            "id": "c1", "object": "chat.completion.chunk", "model": "gpt-4o",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
        });
        assert_eq!(chunk_to_event(&chunk), Some(StreamEvent::Start));
    }

    #[test]
    fn test_content_chunk_is_delta() {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": "Hel"}}]});
        assert_eq!(chunk_to_event(&chunk), Some(StreamEvent::Delta("Hel".into())));
    }

    #[test]
    fn test_finish_chunk_is_stop() {
        let chunk = json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]});
        assert_eq!(chunk_to_event(&chunk), Some(StreamEvent::Stop));
    }

    #[test]
    fn test_usage_trailer_and_unknown_are_none() {
        let chunk = json!({"choices": [], "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}});
        assert_eq!(chunk_to_event(&chunk), None);
        assert_eq!(chunk_to_event(&json!({"foo": "bar"})), None);
        assert_eq!(chunk_to_event(&json!("text")), None);
        assert_eq!(chunk_to_event(&json!({"choices": "nope"})), None);
    }

    #[test]
    fn test_bare_content_is_delta() {
        assert_eq!(
            chunk_to_event(&json!({"content": "x"})),
            Some(StreamEvent::Delta("x".into()))
        );
    }
}
