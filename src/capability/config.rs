use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::THINKING_MODE;

/// Settings for extended reasoning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingModeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Reasoning token budget; the registry default applies when absent.
    #[serde(
        default,
        alias = "budgetTokens",
        skip_serializing_if = "Option::is_none"
    )]
    pub budget_tokens: Option<u32>,
}

/// Configuration for one capability. Known ids are typed; anything else is
/// kept as opaque JSON for plugin capabilities.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapabilityConfig {
    ThinkingMode(ThinkingModeConfig),
    Custom(Value),
}

impl CapabilityConfig {
    /// Decode the config for `id`.
    ///
    /// # Errors
    ///
    /// Returns an error when a known id carries a config of the wrong shape.
    pub fn from_entry(id: &str, value: Value) -> Result<Self, serde_json::Error> {
        match id {
            THINKING_MODE => serde_json::from_value(value).map(CapabilityConfig::ThinkingMode),
            _ => Ok(CapabilityConfig::Custom(value)),
        }
    }

    /// `enabled` flag, read from the typed config or from a custom object.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            CapabilityConfig::ThinkingMode(config) => config.enabled,
            CapabilityConfig::Custom(value) => value
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Capability configs keyed by capability id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CapabilityConfigs(BTreeMap<String, CapabilityConfig>);

impl<'de> Deserialize<'de> for CapabilityConfigs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut configs = BTreeMap::new();
        for (id, value) in raw {
            let config = CapabilityConfig::from_entry(&id, value)
                .map_err(|err| D::Error::custom(format!("capability '{id}': {err}")))?;
            configs.insert(id, config);
        }
        Ok(Self(configs))
    }
}

impl CapabilityConfigs {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CapabilityConfig> {
        self.0.get(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, config: CapabilityConfig) {
        self.0.insert(id.into(), config);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CapabilityConfig)> {
        self.0.iter().map(|(id, config)| (id.as_str(), config))
    }

    #[must_use]
    pub fn thinking_mode(&self) -> Option<&ThinkingModeConfig> {
        match self.0.get(THINKING_MODE) {
            Some(CapabilityConfig::ThinkingMode(config)) => Some(config),
            _ => None,
        }
    }

    pub fn thinking_mode_mut(&mut self) -> Option<&mut ThinkingModeConfig> {
        match self.0.get_mut(THINKING_MODE) {
            Some(CapabilityConfig::ThinkingMode(config)) => Some(config),
            _ => None,
        }
    }

    #[must_use]
    pub fn with_thinking_mode(mut self, config: ThinkingModeConfig) -> Self {
        self.insert(THINKING_MODE, CapabilityConfig::ThinkingMode(config));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_id_is_typed() {
        let configs: CapabilityConfigs = serde_json::from_value(json!({
            "thinking_mode": {"enabled": true, "budget_tokens": 2048},
            "web_search": {"enabled": true, "max_results": 3}
        }))
        .unwrap();
        let thinking = configs.thinking_mode().unwrap();
        assert!(thinking.enabled);
        assert_eq!(thinking.budget_tokens, Some(2048));
        assert!(matches!(
            configs.get("web_search"),
            Some(CapabilityConfig::Custom(value)) if value["max_results"] == 3
        ));
        assert!(configs.get("web_search").unwrap().is_enabled());
    }

    #[test]
    fn test_camel_case_budget_alias() {
        let configs: CapabilityConfigs = serde_json::from_value(json!({
            "thinking_mode": {"enabled": true, "budgetTokens": 1024}
        }))
        .unwrap();
        assert_eq!(configs.thinking_mode().unwrap().budget_tokens, Some(1024));
    }

    #[test]
    fn test_known_id_wrong_shape_rejected() {
        let parsed: Result<CapabilityConfigs, _> =
            serde_json::from_value(json!({"thinking_mode": {"enabled": "yes"}}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let configs = CapabilityConfigs::default().with_thinking_mode(ThinkingModeConfig {
            enabled: true,
            budget_tokens: None,
        });
        assert_eq!(
            serde_json::to_value(&configs).unwrap(),
            json!({"thinking_mode": {"enabled": true}})
        );
    }
}
