use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use tracing::Instrument;

use super::body::{parse_chat_body, redacted_body, ChatPayload};
use crate::auth::ApiKey;
use crate::capability::CapabilityContext;
use crate::error::RelayError;
use crate::observability::token_counter::estimate_request_tokens;
use crate::protocol::{FormattedRequest, ModelConfig, ProviderKind};
use crate::state::request_id::X_REQUEST_ID;
use crate::state::AppState;
use crate::stream::{relay_sse_stream, sse_ok_response, RelayOptions};

/// `POST {base}/chat/{provider}`: format, send upstream, relay the answer.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    provider: &str,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let request_id = state.request_id(&headers);
    let span = tracing::info_span!("chat", request_id = %request_id, provider = %provider);

    let mut response = match handler_inner(state, provider, &request_id, body)
        .instrument(span)
        .await
    {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(request_id = %request_id, error = %err, "chat request failed");
            err.into_response()
        }
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

async fn handler_inner(
    state: Arc<AppState>,
    provider: &str,
    request_id: &str,
    body: bytes::Bytes,
) -> Result<Response, RelayError> {
    let provider: ProviderKind = provider.parse()?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(body = %redacted_body(&body), "incoming chat request");
    }
    let chat = parse_chat_body(&body)?;
    let key = resolve_key(&state, provider, chat.api_key.as_deref())?;
    let client = state.client(provider);

    let (request, model_config) = match chat.payload {
        ChatPayload::Conversation { messages, mut config } => {
            state.capabilities.normalize_config(&mut config);
            let formatted = client.adapter().format_request(&messages, &config);
            let context = CapabilityContext::new(provider, &config);
            let request = state
                .capabilities
                .apply_request_middleware(formatted, &context);
            (request, config)
        }
        ChatPayload::Formatted(request) => {
            let config = config_of(&request);
            (request, config)
        }
    };
    if request.messages.is_empty() {
        return Err(RelayError::InvalidRequest(
            "no non-empty messages to send".into(),
        ));
    }

    tracing::info!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        "relaying chat request"
    );

    if request.stream {
        let upstream = client.submit_stream(&request, &key, Some(request_id)).await?;
        let options = RelayOptions {
            keep_alive_interval: state.keep_alive_interval(),
            cancel: state.stream_token(),
            request_id: request_id.to_string(),
            estimated_input_tokens: estimate_request_tokens(&request),
        };
        let frames = relay_sse_stream(
            upstream,
            Arc::clone(client.adapter()),
            Arc::clone(&state.capabilities),
            model_config,
            options,
        )
        .map(Ok::<_, Infallible>);
        return Ok(sse_ok_response(Body::from_stream(frames)));
    }

    let response = client
        .submit_completion(&request, &key, Some(request_id))
        .await?;
    let context = CapabilityContext::new(provider, &model_config);
    let response = state
        .capabilities
        .apply_response_middleware(response, &context);
    Ok(Json(response).into_response())
}

fn resolve_key(
    state: &AppState,
    provider: ProviderKind,
    body_key: Option<&str>,
) -> Result<ApiKey, RelayError> {
    body_key
        .and_then(ApiKey::parse)
        .or_else(|| state.server_key(provider))
        .ok_or(RelayError::MissingApiKey(provider))
}

/// Settings implied by a pre-formatted request, used for response middleware.
fn config_of(request: &FormattedRequest) -> ModelConfig {
    let mut config = ModelConfig::new(request.model.clone())
        .with_max_tokens(request.max_tokens)
        .streaming(request.stream);
    if let Some(temperature) = request.temperature {
        config.temperature = temperature;
    }
    if let Some(top_p) = request.top_p {
        config.top_p = top_p;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    #[test]
    fn test_config_of_formatted_request() {
        let request = FormattedRequest {
            model: "gpt-4o".into(),
            max_tokens: 256,
            temperature: Some(0.1),
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            stream: true,
            messages: vec![Message::user("hi")],
            system: None,
            extensions: serde_json::Map::new(),
        };
        let config = config_of(&request);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_tokens, 256);
        assert!(config.stream);
        assert!((config.temperature - 0.1).abs() < f64::EPSILON);
        assert!((config.top_p - 1.0).abs() < f64::EPSILON);
    }
}
