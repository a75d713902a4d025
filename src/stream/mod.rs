pub mod keepalive;
pub mod relay;
pub mod sse;

pub use keepalive::KeepAlive;
pub use relay::{relay_sse_stream, RelayOptions};
pub use sse::{decode_sse_stream, sse_ok_response, SseDecoder, SseItem};

use serde_json::{json, Value};

use crate::error::RelayError;

/// Semantic event carried by one decoded stream chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start,
    Delta(String),
    Stop,
    Error { status: u16, message: String },
}

impl StreamEvent {
    /// Convert a mid-stream error frame into the matching error.
    #[must_use]
    pub fn into_error(self) -> Option<RelayError> {
        match self {
            StreamEvent::Error { status, message } => Some(
                crate::error::classify_upstream_status(status, message, None),
            ),
            _ => None,
        }
    }
}

/// `{"error": {message, status, type}}` payload of a mid-stream error frame.
#[must_use]
pub fn error_frame_payload(err: &RelayError) -> Value {
    json!({
        "error": {
            "message": err.detail_message(),
            "status": err.status_code().as_u16(),
            "type": err.category().as_str(),
        }
    })
}
