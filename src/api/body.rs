use serde::Deserialize;
use serde_json::{Map, Value};

use crate::auth::redact_key;
use crate::error::RelayError;
use crate::protocol::{FormattedRequest, Message, ModelConfig};

const API_KEY_FIELD: &str = "apiKey";

/// What the caller asked the relay to send.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatPayload {
    /// Raw conversation; the relay formats it and runs request middleware.
    Conversation {
        messages: Vec<Message>,
        config: ModelConfig,
    },
    /// Already formatted; forwarded as is.
    Formatted(FormattedRequest),
}

/// A parsed `POST /chat/{provider}` body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatBody {
    pub payload: ChatPayload,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormattedEnvelope {
    formatted_request: FormattedRequest,
}

#[derive(Deserialize)]
struct ConversationEnvelope {
    messages: Vec<Message>,
    config: ModelConfig,
}

/// Parse one of the three accepted body shapes:
/// `{formattedRequest, apiKey}`, `{messages, config, apiKey}`, or the
/// formatted request's fields at top level next to `apiKey`.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for non-object or unrecognised bodies.
pub fn parse_chat_body(bytes: &[u8]) -> Result<ChatBody, RelayError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|err| RelayError::InvalidRequest(format!("body is not valid JSON: {err}")))?;
    let Value::Object(mut object) = value else {
        return Err(RelayError::InvalidRequest(
            "body must be a JSON object".into(),
        ));
    };

    let api_key = match object.remove(API_KEY_FIELD) {
        Some(Value::String(key)) => Some(key),
        Some(Value::Null) | None => None,
        Some(_) => {
            return Err(RelayError::InvalidRequest(
                "apiKey must be a string".into(),
            ))
        }
    };

    let payload = if object.contains_key("formattedRequest") {
        let envelope: FormattedEnvelope = from_object(object)?;
        ChatPayload::Formatted(envelope.formatted_request)
    } else if object.contains_key("config") {
        let envelope: ConversationEnvelope = from_object(object)?;
        ChatPayload::Conversation {
            messages: envelope.messages,
            config: envelope.config,
        }
    } else if object.contains_key("model") && object.contains_key("messages") {
        ChatPayload::Formatted(from_object(object)?)
    } else {
        return Err(RelayError::InvalidRequest(
            "expected formattedRequest, messages with config, or model with messages".into(),
        ));
    };

    Ok(ChatBody { payload, api_key })
}

fn from_object<T: serde::de::DeserializeOwned>(object: Map<String, Value>) -> Result<T, RelayError> {
    serde_json::from_value(Value::Object(object))
        .map_err(|err| RelayError::InvalidRequest(format!("invalid request body: {err}")))
}

/// Body text for debug logs with `apiKey` masked.
#[must_use]
pub fn redacted_body(bytes: &[u8]) -> String {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(mut object)) => {
            if let Some(Value::String(key)) = object.get_mut(API_KEY_FIELD) {
                *key = redact_key(key);
            }
            Value::Object(object).to_string()
        }
        Ok(other) => other.to_string(),
        Err(_) => format!("<{} bytes, not JSON>", bytes.len()),
    }
}
