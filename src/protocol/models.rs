use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::ProviderKind;
use crate::config::AppConfig;

/// Fallback when neither the request nor the registry names a token count.
pub const FALLBACK_MAX_TOKENS: u32 = 4096;

/// Registered limits for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub id: String,
    pub provider: ProviderKind,
    /// Hard ceiling for `max_tokens`.
    pub max_tokens: u32,
    pub context_window: u32,
    pub default_max_tokens: u32,
    pub supports_thinking: bool,
}

impl ModelSpec {
    fn builtin(
        id: &str,
        provider: ProviderKind,
        max_tokens: u32,
        context_window: u32,
        default_max_tokens: u32,
        supports_thinking: bool,
    ) -> Self {
        Self {
            id: id.to_string(),
            provider,
            max_tokens,
            context_window,
            default_max_tokens,
            supports_thinking,
        }
    }
}

/// Lookup table of model ceilings, keyed by exact id and by id without a
/// trailing `-YYYYMMDD` snapshot suffix.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    specs: Vec<Arc<ModelSpec>>,
    by_id: FxHashMap<String, usize>,
}

impl ModelRegistry {
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for spec in [
            ModelSpec::builtin(
                "claude-3-7-sonnet-20250219",
                ProviderKind::Anthropic,
                8192,
                200_000,
                4096,
                true,
            ),
            ModelSpec::builtin(
                "claude-3-5-sonnet-20241022",
                ProviderKind::Anthropic,
                8192,
                200_000,
                1024,
                false,
            ),
            ModelSpec::builtin("gpt-4o", ProviderKind::OpenAi, 16384, 128_000, 1024, false),
            ModelSpec::builtin(
                "gpt-4o-mini",
                ProviderKind::OpenAi,
                16384,
                128_000,
                1024,
                false,
            ),
        ] {
            registry.insert(spec);
        }
        registry
    }

    /// Built-in models overlaid with `providers.*.models` entries from config.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::builtin();
        for (kind, provider) in config.providers.iter() {
            for model in &provider.models {
                let default_max_tokens = model
                    .default_max_tokens
                    .unwrap_or_else(|| model.max_tokens.min(FALLBACK_MAX_TOKENS));
                registry.insert(ModelSpec {
                    id: model.id.clone(),
                    provider: kind,
                    max_tokens: model.max_tokens,
                    context_window: model.context_window,
                    default_max_tokens: default_max_tokens.min(model.max_tokens),
                    supports_thinking: model.supports_thinking.unwrap_or(provider.supports_thinking),
                });
            }
        }
        registry
    }

    /// Insert or replace a model.
    pub fn insert(&mut self, spec: ModelSpec) {
        let normalized = normalize_model_id(&spec.id).to_string();
        let exact = spec.id.clone();
        let slot = if let Some(&existing) = self.by_id.get(&exact) {
            self.specs[existing] = Arc::new(spec);
            existing
        } else {
            self.specs.push(Arc::new(spec));
            self.specs.len() - 1
        };
        self.by_id.insert(exact, slot);
        self.by_id.entry(normalized).or_insert(slot);
    }

    #[must_use]
    pub fn get(&self, model: &str) -> Option<&ModelSpec> {
        let slot = self
            .by_id
            .get(model)
            .or_else(|| self.by_id.get(normalize_model_id(model)))?;
        self.specs.get(*slot).map(AsRef::as_ref)
    }

    /// Clamp a requested token count to the model ceiling.
    ///
    /// `0` resolves to the model default. Unknown models keep the requested
    /// value unchanged.
    #[must_use]
    pub fn clamp_max_tokens(&self, model: &str, requested: u32) -> u32 {
        match self.get(model) {
            Some(spec) if requested == 0 => spec.default_max_tokens,
            Some(spec) => requested.min(spec.max_tokens),
            None if requested == 0 => FALLBACK_MAX_TOKENS,
            None => requested,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Strip a trailing `-YYYYMMDD` snapshot suffix.
#[must_use]
pub fn normalize_model_id(model: &str) -> &str {
    let bytes = model.as_bytes();
    if bytes.len() <= 9 {
        return model;
    }
    let split = bytes.len() - 9;
    let (head, tail) = bytes.split_at(split);
    if tail[0] == b'-' && tail[1..].iter().all(u8::is_ascii_digit) && !head.is_empty() {
        &model[..split]
    } else {
        model
    }
}
