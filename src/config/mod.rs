pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;
use crate::protocol::anthropic::DEFAULT_ANTHROPIC_VERSION;
use crate::protocol::ProviderKind;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub base_path: String,
    /// Hard ceiling in seconds for non-streaming upstream calls.
    pub timeout: u64,
    pub connect_timeout_secs: u64,
    pub keep_alive_interval_secs: u64,
    pub max_body_bytes: usize,
    pub http_pool_max_idle_per_host: usize,
    pub http_pool_idle_timeout_secs: u64,
    pub http_use_env_proxy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_max_blocking_threads: Option<usize>,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_base_path() -> String {
    "/api".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_keep_alive_interval_secs() -> u64 {
    15
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize)]
struct ServerConfigWire {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_base_path")]
    base_path: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
    #[serde(default = "default_keep_alive_interval_secs")]
    keep_alive_interval_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    max_body_bytes: usize,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    http_use_env_proxy: bool,
    #[serde(default)]
    runtime_worker_threads: Option<RuntimeThreadsSetting>,
    #[serde(default)]
    runtime_max_blocking_threads: Option<RuntimeThreadsSetting>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeThreadsSetting {
    Fixed(usize),
    Auto(()),
}

fn runtime_threads_or_default(
    setting: Option<&RuntimeThreadsSetting>,
    default: Option<usize>,
) -> Option<usize> {
    match setting {
        None => default,
        Some(RuntimeThreadsSetting::Fixed(threads)) => Some(*threads),
        Some(RuntimeThreadsSetting::Auto(())) => None,
    }
}

impl<'de> Deserialize<'de> for ServerConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ServerConfigWire::deserialize(deserializer)?;
        Ok(Self {
            port: wire.port,
            host: wire.host,
            base_path: wire.base_path,
            timeout: wire.timeout,
            connect_timeout_secs: wire.connect_timeout_secs,
            keep_alive_interval_secs: wire.keep_alive_interval_secs,
            max_body_bytes: wire.max_body_bytes,
            http_pool_max_idle_per_host: wire.http_pool_max_idle_per_host,
            http_pool_idle_timeout_secs: wire.http_pool_idle_timeout_secs,
            http_use_env_proxy: wire.http_use_env_proxy,
            // missing => default, explicit null => auto
            runtime_worker_threads: runtime_threads_or_default(
                wire.runtime_worker_threads.as_ref(),
                None,
            ),
            runtime_max_blocking_threads: runtime_threads_or_default(
                wire.runtime_max_blocking_threads.as_ref(),
                Some(8),
            ),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: default_base_path(),
            timeout: default_timeout(),
            connect_timeout_secs: default_connect_timeout_secs(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            max_body_bytes: default_max_body_bytes(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            runtime_worker_threads: None,
            runtime_max_blocking_threads: Some(8),
        }
    }
}

/// One model entry under `providers.<name>.models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntryConfig {
    pub id: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub context_window: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_thinking: Option<bool>,
}

/// Upstream vendor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Vendor origin without the endpoint path; vendor default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Server-side key used when a request carries none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub supports_thinking: bool,
    #[serde(default)]
    pub models: Vec<ModelEntryConfig>,
}

fn default_api_version() -> String {
    DEFAULT_ANTHROPIC_VERSION.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_version: default_api_version(),
            supports_thinking: false,
            models: Vec::new(),
        }
    }
}

/// Per-vendor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub anthropic: ProviderConfig,
}

impl ProvidersConfig {
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &ProviderConfig)> {
        ProviderKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    /// Configured base URL, or the vendor's public origin.
    #[must_use]
    pub fn base_url(&self, kind: ProviderKind) -> &str {
        self.get(kind)
            .base_url
            .as_deref()
            .unwrap_or(match kind {
                ProviderKind::OpenAi => "https://api.openai.com",
                ProviderKind::Anthropic => "https://api.anthropic.com",
            })
    }
}

/// Settings for the built-in `thinking_mode` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingModeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_budget_tokens")]
    pub default_budget_tokens: u32,
}

fn default_budget_tokens() -> u32 {
    16_000
}

impl Default for ThinkingModeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_budget_tokens: default_budget_tokens(),
        }
    }
}

/// Capability registration settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub thinking_mode: ThinkingModeSettings,
}

/// Settings for the submission side (embedding client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay base including its base path, e.g. `http://127.0.0.1:3000/api`.
    /// Vendors are called directly when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub generate_titles: bool,
    #[serde(default = "default_title_max_tokens")]
    pub title_max_tokens: u32,
}

fn default_title_max_tokens() -> u32 {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            generate_titles: false,
            title_max_tokens: default_title_max_tokens(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Text,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.base_path, "/api");
        assert_eq!(config.server.keep_alive_interval_secs, 15);
        assert_eq!(config.providers.anthropic.api_version, "2023-06-01");
        assert!(config.capabilities.thinking_mode.enabled);
        assert_eq!(config.capabilities.thinking_mode.default_budget_tokens, 16_000);
        assert!(!config.providers.anthropic.models.is_empty());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.server.timeout, 30);
        assert_eq!(config.server.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.features.log_format, LogFormat::Text);
        assert_eq!(
            config.providers.base_url(ProviderKind::Anthropic),
            "https://api.anthropic.com"
        );
        assert!(!config.client.generate_titles);
        assert_eq!(config.client.title_max_tokens, 100);
    }

    #[test]
    fn test_server_config_runtime_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.runtime_worker_threads, None);
        assert_eq!(server.runtime_max_blocking_threads, Some(8));
        let explicit: ServerConfig =
            serde_yaml::from_str("runtime_max_blocking_threads: null").unwrap();
        assert_eq!(explicit.runtime_max_blocking_threads, None);
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
