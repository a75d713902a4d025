use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::ServerConfig;
use crate::error::RelayError;

use super::upstream_status::upstream_error;

const PARSED_URL_CACHE_MAX_ENTRIES: usize = 512;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    use_env_proxy: bool,
) -> Result<reqwest::Client, RelayError> {
    // No overall timeout: streams have no fixed ceiling and whole responses
    // are bounded by the caller.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Pooled HTTP client for upstream provider calls.
pub struct HttpTransport {
    client: reqwest::Client,
    parsed_url_cache: RwLock<FxHashMap<String, Arc<url::Url>>>,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from the given server config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the TLS client cannot be built.
    pub fn new(config: &ServerConfig) -> Result<Self, RelayError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.connect_timeout_secs.max(1)),
            config.http_use_env_proxy,
        )?;
        Ok(Self::with_client(client))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            parsed_url_cache: RwLock::new(FxHashMap::default()),
        }
    }

    fn parsed_url(&self, url: &str) -> Result<Arc<url::Url>, RelayError> {
        if let Some(cached) = self.parsed_url_cache.read().get(url) {
            return Ok(cached.clone());
        }

        let parsed = url::Url::parse(url)
            .map_err(|e| RelayError::Config(format!("Invalid upstream URL '{url}': {e}")))?;

        let mut cache = self.parsed_url_cache.write();
        if let Some(existing) = cache.get(url) {
            return Ok(existing.clone());
        }
        if cache.len() >= PARSED_URL_CACHE_MAX_ENTRIES {
            cache.clear();
        }
        let parsed = Arc::new(parsed);
        cache.insert(url.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// POST `body` to `url` and return the response once its status is 2xx.
    ///
    /// The body of a 2xx response is left unread so streaming callers can
    /// consume it incrementally.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] for network failures and the
    /// status-classified upstream error for non-2xx replies.
    pub async fn post(
        &self,
        url: &str,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, RelayError> {
        let parsed_url = self.parsed_url(url)?;
        let mut request = reqwest::Request::new(http::Method::POST, parsed_url.as_ref().clone());
        *request.headers_mut() = headers;
        *request.body_mut() = Some(reqwest::Body::from(body));

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.unwrap_or_default();
        let err = upstream_error(status, &headers, &body);
        tracing::debug!(status = status.as_u16(), error = %err, "upstream returned error status");
        Err(err)
    }
}
