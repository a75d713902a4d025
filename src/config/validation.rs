use std::collections::HashSet;

use super::{AppConfig, ConfigError};
use crate::protocol::ProviderKind;

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_providers(config)?;
    validate_capabilities(config)?;
    validate_client(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.connect_timeout_secs == 0 {
        return Err(validation_err(
            "server.connect_timeout_secs must be greater than 0",
        ));
    }
    if !(1..=60).contains(&server.keep_alive_interval_secs) {
        return Err(validation_err(
            "server.keep_alive_interval_secs must be between 1 and 60",
        ));
    }
    if server.max_body_bytes == 0 {
        return Err(validation_err("server.max_body_bytes must be greater than 0"));
    }
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(max_blocking_threads) = server.runtime_max_blocking_threads {
        if max_blocking_threads == 0 {
            return Err(validation_err(
                "server.runtime_max_blocking_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_providers(config: &AppConfig) -> Result<(), ConfigError> {
    for (kind, provider) in config.providers.iter() {
        if let Some(base_url) = provider.base_url.as_deref() {
            validate_http_url(&format!("providers.{kind}.base_url"), base_url)?;
        }
        if let Some(api_key) = provider.api_key.as_deref() {
            if api_key.trim().is_empty() {
                return Err(validation_err(format!(
                    "providers.{kind}.api_key cannot be empty when set"
                )));
            }
        }
        if kind == ProviderKind::Anthropic && provider.api_version.trim().is_empty() {
            return Err(validation_err(
                "providers.anthropic.api_version cannot be empty",
            ));
        }

        let mut seen = HashSet::new();
        for model in &provider.models {
            if model.id.trim().is_empty() {
                return Err(validation_err(format!(
                    "providers.{kind}: model id cannot be empty"
                )));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(validation_err(format!(
                    "providers.{kind}: duplicate model entry '{}'",
                    model.id
                )));
            }
            if model.max_tokens == 0 {
                return Err(validation_err(format!(
                    "providers.{kind}: model '{}' max_tokens must be greater than 0",
                    model.id
                )));
            }
            if let Some(default_max_tokens) = model.default_max_tokens {
                if default_max_tokens == 0 || default_max_tokens > model.max_tokens {
                    return Err(validation_err(format!(
                        "providers.{kind}: model '{}' default_max_tokens must be in 1..={}",
                        model.id, model.max_tokens
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_capabilities(config: &AppConfig) -> Result<(), ConfigError> {
    if config.capabilities.thinking_mode.default_budget_tokens == 0 {
        return Err(validation_err(
            "capabilities.thinking_mode.default_budget_tokens must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_client(config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(relay_url) = config.client.relay_url.as_deref() {
        validate_http_url("client.relay_url", relay_url)?;
    }
    if config.client.title_max_tokens == 0 {
        return Err(validation_err(
            "client.title_max_tokens must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, raw: &str) -> Result<(), ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(validation_err(format!("{field_name} cannot be empty when set")));
    }
    let parsed = url::Url::parse(raw)
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.anthropic = ProviderConfig {
            base_url: Some("https://api.anthropic.com".to_string()),
            api_key: Some("sk-ant-test".to_string()),
            api_version: "2023-06-01".to_string(),
            supports_thinking: true,
            models: vec![ModelEntryConfig {
                id: "claude-3-7-sonnet-20250219".to_string(),
                max_tokens: 8192,
                context_window: 200_000,
                default_max_tokens: Some(4096),
                supports_thinking: Some(true),
            }],
        };
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_keep_alive_interval_bounds() {
        let mut config = make_valid_config();
        config.server.keep_alive_interval_secs = 0;
        assert!(validate_config(&config).is_err());
        config.server.keep_alive_interval_secs = 61;
        assert!(validate_config(&config).is_err());
        config.server.keep_alive_interval_secs = 60;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.providers.openai.base_url = Some("ftp://bad.url".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.providers.anthropic.api_key = Some("  ".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_model_within_provider() {
        let mut config = make_valid_config();
        let duplicate = config.providers.anthropic.models[0].clone();
        config.providers.anthropic.models.push(duplicate);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_default_tokens_above_ceiling() {
        let mut config = make_valid_config();
        config.providers.anthropic.models[0].default_max_tokens = Some(10_000);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config = make_valid_config();
        config.capabilities.thinking_mode.default_budget_tokens = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_relay_url() {
        let mut config = make_valid_config();
        config.client.relay_url = Some("not a url".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_level_case_insensitive() {
        let mut config = make_valid_config();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
