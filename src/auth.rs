use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use secrecy::{ExposeSecret, SecretString};

use crate::config::AppConfig;
use crate::protocol::ProviderKind;

const REDACT_HEAD: usize = 8;
const REDACT_TAIL: usize = 4;

/// An upstream API key. Never printed in full: `Debug` and [`ApiKey::redacted`]
/// show only the first and last characters.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Wrap a raw key, rejecting empty or whitespace-only input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(SecretString::from(trimmed.to_string())))
        }
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    #[must_use]
    pub fn redacted(&self) -> String {
        redact_key(self.expose())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.redacted()).finish()
    }
}

/// `sk-abcde...wxyz` form used in logs. Short keys are fully masked.
#[must_use]
pub fn redact_key(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() <= REDACT_HEAD + REDACT_TAIL {
        return "***".to_string();
    }
    let head: String = chars[..REDACT_HEAD].iter().collect();
    let tail: String = chars[chars.len() - REDACT_TAIL..].iter().collect();
    format!("{head}...{tail}")
}

/// Source of upstream API keys.
pub trait ApiKeyProvider: Send + Sync {
    fn get_key(&self, provider: ProviderKind) -> Option<ApiKey>;
}

impl<T: ApiKeyProvider + ?Sized> ApiKeyProvider for Arc<T> {
    fn get_key(&self, provider: ProviderKind) -> Option<ApiKey> {
        (**self).get_key(provider)
    }
}

/// Fixed per-provider keys, typically from `providers.*.api_key`.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeys {
    keys: FxHashMap<ProviderKind, ApiKey>,
}

impl StaticApiKeys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider: ProviderKind, raw: &str) -> Self {
        if let Some(key) = ApiKey::parse(raw) {
            self.keys.insert(provider, key);
        }
        self
    }

    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut keys = Self::new();
        for (kind, provider) in config.providers.iter() {
            if let Some(raw) = provider.api_key.as_deref() {
                keys = keys.with(kind, raw);
            }
        }
        keys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ApiKeyProvider for StaticApiKeys {
    fn get_key(&self, provider: ProviderKind) -> Option<ApiKey> {
        self.keys.get(&provider).cloned()
    }
}

/// Keys read from `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` at lookup time.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvApiKeys;

impl EnvApiKeys {
    #[must_use]
    pub fn variable(provider: ProviderKind) -> &'static str {
        match provider {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl ApiKeyProvider for EnvApiKeys {
    fn get_key(&self, provider: ProviderKind) -> Option<ApiKey> {
        std::env::var(Self::variable(provider))
            .ok()
            .as_deref()
            .and_then(ApiKey::parse)
    }
}

/// Consult `primary`, then `fallback`.
#[derive(Debug, Clone, Default)]
pub struct FallbackApiKeys<P, F> {
    pub primary: P,
    pub fallback: F,
}

impl<P: ApiKeyProvider, F: ApiKeyProvider> ApiKeyProvider for FallbackApiKeys<P, F> {
    fn get_key(&self, provider: ProviderKind) -> Option<ApiKey> {
        self.primary
            .get_key(provider)
            .or_else(|| self.fallback.get_key(provider))
    }
}

/// Server-side keys: configured keys first, then the environment.
#[must_use]
pub fn server_api_keys(config: &AppConfig) -> FallbackApiKeys<StaticApiKeys, EnvApiKeys> {
    FallbackApiKeys {
        primary: StaticApiKeys::from_config(config),
        fallback: EnvApiKeys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_long_key() {
        assert_eq!(redact_key("sk-abcdef1234567890wxyz"), "sk-abcde...wxyz");
    }

    #[test]
    fn test_redact_short_key_fully_masked() {
        assert_eq!(redact_key("short"), "***");
        assert_eq!(redact_key(""), "***");
    }

    #[test]
    fn test_debug_never_prints_raw_key() {
        let key = ApiKey::parse("sk-secret-0123456789-tail").unwrap();
        let printed = format!("{key:?}");
        assert!(!printed.contains("secret-0123456789"));
        assert!(printed.contains("tail"));
    }

    #[test]
    fn test_parse_rejects_blank() {
        assert!(ApiKey::parse("   ").is_none());
        assert_eq!(ApiKey::parse(" k ").unwrap().expose(), "k");
    }

    #[test]
    fn test_static_then_fallback() {
        let keys = FallbackApiKeys {
            primary: StaticApiKeys::new().with(ProviderKind::OpenAi, "sk-openai"),
            fallback: StaticApiKeys::new().with(ProviderKind::Anthropic, "sk-ant"),
        };
        assert_eq!(
            keys.get_key(ProviderKind::OpenAi).unwrap().expose(),
            "sk-openai"
        );
        assert_eq!(
            keys.get_key(ProviderKind::Anthropic).unwrap().expose(),
            "sk-ant"
        );
        let empty = StaticApiKeys::new();
        assert!(empty.get_key(ProviderKind::OpenAi).is_none());
    }
}
