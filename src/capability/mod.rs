//! Priority-ordered capability middleware.
//!
//! A capability declares which `(provider, model)` pairs it applies to and may
//! rewrite the formatted request before it is sent and the normalized response
//! after it is parsed. Adapters stay unaware of capabilities.

pub mod config;
pub mod thinking;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::CapabilitiesConfig;
use crate::error::RelayError;
use crate::protocol::{FormattedRequest, ModelConfig, ModelRegistry, ProviderKind, ProviderResponse};

pub use config::{CapabilityConfig, CapabilityConfigs, ThinkingModeConfig};

pub const THINKING_MODE: &str = "thinking_mode";

/// Immutable view handed to every transformer of one pass.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityContext<'a> {
    pub provider: ProviderKind,
    pub model: &'a str,
    pub model_config: &'a ModelConfig,
}

impl<'a> CapabilityContext<'a> {
    #[must_use]
    pub fn new(provider: ProviderKind, model_config: &'a ModelConfig) -> Self {
        Self {
            provider,
            model: &model_config.model,
            model_config,
        }
    }
}

pub type SupportPredicate = Arc<dyn Fn(ProviderKind, &str) -> bool + Send + Sync>;
pub type RequestMiddleware = Arc<
    dyn Fn(&FormattedRequest, &CapabilityContext<'_>) -> Result<FormattedRequest, RelayError>
        + Send
        + Sync,
>;
pub type ResponseMiddleware = Arc<
    dyn Fn(&ProviderResponse, &CapabilityContext<'_>) -> Result<ProviderResponse, RelayError>
        + Send
        + Sync,
>;

/// One optional capability.
#[derive(Clone)]
pub struct CapabilityDefinition {
    pub id: String,
    pub name: String,
    /// Higher runs first.
    pub priority: i32,
    is_supported: SupportPredicate,
    format_request: Option<RequestMiddleware>,
    parse_response: Option<ResponseMiddleware>,
}

impl CapabilityDefinition {
    pub fn new<F>(id: impl Into<String>, priority: i32, is_supported: F) -> Self
    where
        F: Fn(ProviderKind, &str) -> bool + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            priority,
            is_supported: Arc::new(is_supported),
            format_request: None,
            parse_response: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_request_middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(&FormattedRequest, &CapabilityContext<'_>) -> Result<FormattedRequest, RelayError>
            + Send
            + Sync
            + 'static,
    {
        self.format_request = Some(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn with_response_middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(&ProviderResponse, &CapabilityContext<'_>) -> Result<ProviderResponse, RelayError>
            + Send
            + Sync
            + 'static,
    {
        self.parse_response = Some(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn is_supported(&self, provider: ProviderKind, model: &str) -> bool {
        (self.is_supported)(provider, model)
    }
}

impl fmt::Debug for CapabilityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("format_request", &self.format_request.is_some())
            .field("parse_response", &self.parse_response.is_some())
            .finish()
    }
}

type CapabilityList = Arc<[Arc<CapabilityDefinition>]>;

/// Registered capabilities, kept sorted by descending priority with ties in
/// registration order.
///
/// Readers take a cheap snapshot of the list, so registration never blocks a
/// pass that is already running.
pub struct CapabilityRegistry {
    capabilities: RwLock<CapabilityList>,
    default_thinking_budget: u32,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(Arc::from(Vec::new())),
            default_thinking_budget: thinking::DEFAULT_BUDGET_TOKENS,
        }
    }

    /// Registry with the built-in capabilities enabled in `settings`. Model
    /// support is read from `models`.
    #[must_use]
    pub fn with_builtins(settings: &CapabilitiesConfig, models: Arc<ModelRegistry>) -> Self {
        let mut registry = Self::new();
        registry.default_thinking_budget = settings.thinking_mode.default_budget_tokens;
        if settings.thinking_mode.enabled {
            registry.register(thinking::thinking_mode_capability(
                settings.thinking_mode.default_budget_tokens,
                models,
            ));
        }
        registry
    }

    /// Register a capability and re-sort. A capability with the same id is
    /// replaced.
    pub fn register(&self, capability: CapabilityDefinition) {
        let mut guard = self.capabilities.write();
        let mut next: Vec<Arc<CapabilityDefinition>> = guard.iter().cloned().collect();
        if let Some(existing) = next.iter().position(|c| c.id == capability.id) {
            tracing::warn!("capability '{}' registered twice; replacing", capability.id);
            next.remove(existing);
        }
        next.push(Arc::new(capability));
        // Stable: equal priorities keep registration order.
        next.sort_by(|a, b| b.priority.cmp(&a.priority));
        *guard = Arc::from(next);
    }

    #[must_use]
    pub fn snapshot(&self) -> CapabilityList {
        Arc::clone(&self.capabilities.read())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<CapabilityDefinition>> {
        self.snapshot().iter().find(|c| c.id == id).cloned()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.snapshot().iter().map(|c| c.id.clone()).collect()
    }

    /// Capabilities applicable to `(provider, model)`, in pipeline order.
    #[must_use]
    pub fn supported(&self, provider: ProviderKind, model: &str) -> Vec<Arc<CapabilityDefinition>> {
        self.snapshot()
            .iter()
            .filter(|c| c.is_supported(provider, model))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_capability_supported(&self, id: &str, provider: ProviderKind, model: &str) -> bool {
        self.get(id)
            .is_some_and(|capability| capability.is_supported(provider, model))
    }

    /// Fold the request through every supported request transformer.
    ///
    /// A transformer error is logged and skipped; the fold continues with the
    /// value it was given.
    #[must_use]
    pub fn apply_request_middleware(
        &self,
        request: FormattedRequest,
        ctx: &CapabilityContext<'_>,
    ) -> FormattedRequest {
        let mut current = request;
        for capability in self.snapshot().iter() {
            let Some(middleware) = capability.format_request.as_ref() else {
                continue;
            };
            if !capability.is_supported(ctx.provider, ctx.model) {
                continue;
            }
            match middleware(&current, ctx) {
                Ok(next) => current = next,
                Err(err) => log_middleware_error(&capability.id, "request", ctx, &err),
            }
        }
        current
    }

    /// Fold the response through every supported response transformer.
    #[must_use]
    pub fn apply_response_middleware(
        &self,
        response: ProviderResponse,
        ctx: &CapabilityContext<'_>,
    ) -> ProviderResponse {
        let mut current = response;
        for capability in self.snapshot().iter() {
            let Some(middleware) = capability.parse_response.as_ref() else {
                continue;
            };
            if !capability.is_supported(ctx.provider, ctx.model) {
                continue;
            }
            match middleware(&current, ctx) {
                Ok(next) => current = next,
                Err(err) => log_middleware_error(&capability.id, "response", ctx, &err),
            }
        }
        current
    }

    /// Validate a model config against registered capabilities: token budgets
    /// are clamped to `max_tokens` and unregistered ids are reported.
    pub fn normalize_config(&self, config: &mut ModelConfig) {
        let registered = self.snapshot();
        for (id, _) in config.capabilities.iter() {
            if !registered.iter().any(|c| c.id == id) {
                tracing::warn!("capability config for unregistered id '{id}' will be ignored");
            }
        }

        let max_tokens = config.max_tokens;
        let default_budget = self.default_thinking_budget;
        if let Some(thinking) = config.capabilities.thinking_mode_mut() {
            if thinking.enabled && max_tokens > 0 {
                let budget = thinking.budget_tokens.unwrap_or(default_budget);
                if budget > max_tokens {
                    tracing::debug!(
                        "clamping thinking budget {budget} to max_tokens {max_tokens}"
                    );
                    thinking.budget_tokens = Some(max_tokens);
                }
            }
        }
    }
}

fn log_middleware_error(id: &str, stage: &str, ctx: &CapabilityContext<'_>, err: &RelayError) {
    let err = RelayError::Middleware {
        capability: id.to_string(),
        message: err.to_string(),
    };
    tracing::error!(
        capability = id,
        stage = stage,
        provider = %ctx.provider,
        model = ctx.model,
        "{err}; continuing with previous value"
    );
}
