use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

use super::HttpTransport;
use crate::auth::ApiKey;
use crate::error::RelayError;
use crate::protocol::{FormattedRequest, ProviderAdapter, ProviderKind, ProviderResponse};
use crate::stream::{decode_sse_stream, SseItem};

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Where a [`ProviderClient`] sends requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Straight to the vendor API at this base URL, in its native wire format.
    Direct(String),
    /// Through a relay server at this base URL (`{base}/chat/{provider}`).
    Relay(String),
}

impl Endpoint {
    fn url(&self, adapter: &dyn ProviderAdapter) -> String {
        match self {
            Endpoint::Direct(base) => {
                format!("{}{}", base.trim_end_matches('/'), adapter.endpoint_path())
            }
            Endpoint::Relay(base) => {
                format!("{}/chat/{}", base.trim_end_matches('/'), adapter.id())
            }
        }
    }
}

/// Decoded upstream stream: one item per SSE block.
pub type UpstreamStream = std::pin::Pin<Box<dyn Stream<Item = Result<SseItem, RelayError>> + Send>>;

/// Network side of one provider: sends formatted requests through an adapter.
#[derive(Clone)]
pub struct ProviderClient {
    transport: Arc<HttpTransport>,
    adapter: Arc<dyn ProviderAdapter>,
    endpoint: Endpoint,
    request_timeout: Duration,
}

impl ProviderClient {
    #[must_use]
    pub fn new(
        transport: Arc<HttpTransport>,
        adapter: Arc<dyn ProviderAdapter>,
        endpoint: Endpoint,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            adapter,
            endpoint,
            request_timeout,
        }
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.adapter.kind()
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.endpoint.url(self.adapter.as_ref())
    }

    fn build_request(
        &self,
        request: &FormattedRequest,
        key: &ApiKey,
        trace_id: Option<&str>,
    ) -> Result<(HeaderMap, Bytes), RelayError> {
        let (mut headers, body) = match &self.endpoint {
            Endpoint::Direct(_) => {
                let headers = self.adapter.auth_headers(key)?;
                let body = self.adapter.encode_request(request)?;
                (headers, body)
            }
            Endpoint::Relay(_) => {
                let body = serde_json::to_vec(&json!({
                    "formattedRequest": request,
                    "apiKey": key.expose(),
                }))
                .map_err(|err| {
                    RelayError::InvalidRequest(format!("failed to encode request: {err}"))
                })?;
                (HeaderMap::with_capacity(2), body)
            }
        };
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(value) = trace_id.and_then(|id| HeaderValue::from_str(id).ok()) {
            headers.insert(X_REQUEST_ID, value);
        }
        Ok((headers, Bytes::from(body)))
    }

    /// Send a non-streaming request and normalize the whole response.
    ///
    /// The call is bounded by the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Timeout`] when the ceiling elapses, the
    /// classified upstream error for non-2xx replies, and
    /// [`RelayError::InvalidResponseFormat`] for unreadable bodies.
    pub async fn submit_completion(
        &self,
        request: &FormattedRequest,
        key: &ApiKey,
        trace_id: Option<&str>,
    ) -> Result<ProviderResponse, RelayError> {
        let (headers, body) = self.build_request(request, key, trace_id)?;
        let url = self.url();
        tracing::debug!(
            provider = %self.provider(),
            url = %url,
            model = %request.model,
            key = %key.redacted(),
            "sending completion request"
        );

        let call = async {
            let response = self.transport.post(&url, headers, body).await?;
            let bytes = response
                .bytes()
                .await
                .map_err(|err| RelayError::Transport(err.to_string()))?;
            let raw: Value = serde_json::from_slice(&bytes).map_err(|err| {
                RelayError::InvalidResponseFormat {
                    provider: self.provider(),
                    message: format!("response is not JSON: {err}"),
                }
            })?;
            self.adapter.normalize_response(&raw)
        };

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout(self.request_timeout.as_secs())),
        }
    }

    /// Send a streaming request and return the decoded SSE items.
    ///
    /// Dropping the returned stream aborts the underlying HTTP request.
    ///
    /// # Errors
    ///
    /// Returns the classified upstream error when the reply is not 2xx, or
    /// [`RelayError::Transport`] when the connection fails.
    pub async fn submit_stream(
        &self,
        request: &FormattedRequest,
        key: &ApiKey,
        trace_id: Option<&str>,
    ) -> Result<UpstreamStream, RelayError> {
        let mut request = request.clone();
        request.stream = true;
        let (headers, body) = self.build_request(&request, key, trace_id)?;
        let url = self.url();
        tracing::debug!(
            provider = %self.provider(),
            url = %url,
            model = %request.model,
            key = %key.redacted(),
            "opening stream"
        );

        let response = self.transport.post(&url, headers, body).await?;
        let items = decode_sse_stream(response.bytes_stream())
            .map_err(|err| RelayError::Transport(format!("stream interrupted: {err}")));
        Ok(items.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AdapterRegistry, Message, ModelRegistry};

    fn client(kind: ProviderKind, endpoint: Endpoint) -> ProviderClient {
        let adapters = AdapterRegistry::new(Arc::new(ModelRegistry::builtin()), "2023-06-01");
        ProviderClient::new(
            Arc::new(HttpTransport::with_client(reqwest::Client::new())),
            adapters.get(kind),
            endpoint,
            Duration::from_secs(30),
        )
    }

    fn request() -> FormattedRequest {
        FormattedRequest {
            model: "gpt-4o".into(),
            max_tokens: 100,
            temperature: Some(0.7),
            top_p: Some(1.0),
            presence_penalty: Some(0.0),
            frequency_penalty: Some(0.0),
            stream: false,
            messages: vec![Message::user("hi")],
            system: None,
            extensions: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_endpoint_urls() {
        let direct = client(
            ProviderKind::OpenAi,
            Endpoint::Direct("https://api.openai.com/".into()),
        );
        assert_eq!(direct.url(), "https://api.openai.com/v1/chat/completions");
        let relay = client(
            ProviderKind::Anthropic,
            Endpoint::Relay("http://127.0.0.1:3000/api".into()),
        );
        assert_eq!(relay.url(), "http://127.0.0.1:3000/api/chat/anthropic");
    }

    #[test]
    fn test_direct_request_uses_vendor_auth() {
        let client = client(
            ProviderKind::OpenAi,
            Endpoint::Direct("https://api.openai.com".into()),
        );
        let key = ApiKey::parse("sk-test-1234567890").unwrap();
        let (headers, body) = client.build_request(&request(), &key, Some("req-1")).unwrap();
        assert_eq!(
            headers[http::header::AUTHORIZATION],
            "Bearer sk-test-1234567890"
        );
        assert_eq!(headers["x-request-id"], "req-1");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert!(body.get("apiKey").is_none());
    }

    #[test]
    fn test_relay_request_wraps_formatted_request() {
        let client = client(
            ProviderKind::OpenAi,
            Endpoint::Relay("http://127.0.0.1:3000/api".into()),
        );
        let key = ApiKey::parse("sk-test-1234567890").unwrap();
        let (headers, body) = client.build_request(&request(), &key, None).unwrap();
        assert!(headers.get(http::header::AUTHORIZATION).is_none());
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["apiKey"], "sk-test-1234567890");
        assert_eq!(body["formattedRequest"]["model"], "gpt-4o");
    }
}
