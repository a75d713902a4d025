pub mod request_id;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::auth::{server_api_keys, ApiKey, ApiKeyProvider};
use crate::capability::CapabilityRegistry;
use crate::config::AppConfig;
use crate::protocol::{AdapterRegistry, ModelRegistry, ProviderKind};
use crate::transport::{Endpoint, HttpTransport, ProviderClient};

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: Arc<HttpTransport>,
    pub models: Arc<ModelRegistry>,
    pub adapters: AdapterRegistry,
    pub capabilities: Arc<CapabilityRegistry>,
    clients: [ProviderClient; 2],
    api_keys: Arc<dyn ApiKeyProvider>,
    request_ids: RequestIdGenerator,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport) -> Self {
        let api_keys: Arc<dyn ApiKeyProvider> = Arc::new(server_api_keys(&config));
        let transport = Arc::new(transport);
        let models = Arc::new(ModelRegistry::from_config(&config));
        let adapters = AdapterRegistry::from_config(&config, Arc::clone(&models));
        let capabilities = Arc::new(CapabilityRegistry::with_builtins(
            &config.capabilities,
            Arc::clone(&models),
        ));
        let timeout = Duration::from_secs(config.server.timeout);
        let clients = ProviderKind::ALL.map(|kind| {
            ProviderClient::new(
                Arc::clone(&transport),
                adapters.get(kind),
                Endpoint::Direct(config.providers.base_url(kind).to_string()),
                timeout,
            )
        });

        tracing::debug!(
            models = models.len(),
            capabilities = ?capabilities.ids(),
            "application state ready"
        );

        Self {
            config,
            transport,
            models,
            adapters,
            capabilities,
            clients,
            api_keys,
            request_ids: RequestIdGenerator::new(),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Replace the server-side key source.
    #[must_use]
    pub fn with_api_keys(mut self, api_keys: Arc<dyn ApiKeyProvider>) -> Self {
        self.api_keys = api_keys;
        self
    }

    #[must_use]
    pub fn client(&self, provider: ProviderKind) -> &ProviderClient {
        match provider {
            ProviderKind::OpenAi => &self.clients[0],
            ProviderKind::Anthropic => &self.clients[1],
        }
    }

    #[must_use]
    pub fn server_key(&self, provider: ProviderKind) -> Option<ApiKey> {
        self.api_keys.get_key(provider)
    }

    #[must_use]
    pub fn request_id(&self, headers: &http::HeaderMap) -> String {
        self.request_ids.resolve(headers)
    }

    #[must_use]
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.config.server.keep_alive_interval_secs.max(1))
    }

    /// Token tripped by [`AppState::shutdown`]; each open stream holds a child.
    #[must_use]
    pub fn stream_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// End every open relay stream.
    pub fn shutdown(&self) {
        tracing::info!("closing open streams");
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
