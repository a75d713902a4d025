use serde::Deserialize;
use serde_json::Value;

use super::AnthropicStreamEvent;
use crate::protocol::adapter::{error_frame_event, normalized_delta_text};
use crate::stream::StreamEvent;

/// Classify one Messages API stream event.
///
/// Text arrives in `content_block_delta` (`text_delta`) and occasionally
/// pre-filled in `content_block_start`. Thinking and tool deltas carry no text.
pub(crate) fn chunk_to_event(chunk: &Value) -> Option<StreamEvent> {
    if let Some(event) = error_frame_event(chunk) {
        return Some(event);
    }

    if chunk.get("choices").is_some() {
        return normalized_delta_text(chunk)
            .filter(|text| !text.is_empty())
            .map(|text| StreamEvent::Delta(text.to_string()));
    }

    match AnthropicStreamEvent::deserialize(chunk).ok()? {
        AnthropicStreamEvent::MessageStart {} => Some(StreamEvent::Start),
        AnthropicStreamEvent::ContentBlockStart { content_block } => content_block
            .text_value()
            .filter(|text| !text.is_empty())
            .map(|text| StreamEvent::Delta(text.to_string())),
        AnthropicStreamEvent::ContentBlockDelta { delta } => delta
            .text_value()
            .filter(|text| !text.is_empty())
            .map(|text| StreamEvent::Delta(text.to_string())),
        AnthropicStreamEvent::MessageStop {} => Some(StreamEvent::Stop),
        AnthropicStreamEvent::ContentBlockStop {}
        | AnthropicStreamEvent::MessageDelta {}
        | AnthropicStreamEvent::Ping {}
        | AnthropicStreamEvent::Unknown => None,
    }
}
