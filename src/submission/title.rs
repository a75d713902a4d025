use crate::auth::ApiKey;
use crate::capability::CapabilityConfigs;
use crate::error::RelayError;
use crate::protocol::{Message, ModelConfig};
use crate::transport::ProviderClient;

pub const DEFAULT_TITLE: &str = "New Chat";

/// Settings for post-generation titling.
#[derive(Debug, Clone)]
pub struct TitleSettings {
    pub max_tokens: u32,
    pub language: String,
}

impl Default for TitleSettings {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            language: "en".to_string(),
        }
    }
}

#[must_use]
pub fn title_prompt(user: &str, assistant: &str, language: &str) -> Message {
    Message::user(format!(
        "Generate a title in less than 6 words for the following message (language: {language}):\n\"\"\"\nUser: {user}\nAssistant: {assistant}\n\"\"\""
    ))
}

/// Strip quotes, edge punctuation and repeated whitespace from a model-written title.
#[must_use]
pub fn clean_title(raw: &str) -> String {
    let without_quotes: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`'))
        .collect();
    let trimmed = without_quotes
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && !c.is_whitespace() && c != '_');
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ask the model for a short title of the last exchange.
///
/// # Errors
///
/// Returns the completion error, or [`RelayError::InvalidResponseFormat`] when
/// the reply has no usable text.
pub async fn generate_title(
    client: &ProviderClient,
    key: &ApiKey,
    base: &ModelConfig,
    user: &str,
    assistant: &str,
    settings: &TitleSettings,
) -> Result<String, RelayError> {
    let config = ModelConfig {
        max_tokens: settings.max_tokens,
        stream: false,
        capabilities: CapabilityConfigs::default(),
        ..base.clone()
    };
    let prompt = [title_prompt(user, assistant, &settings.language)];
    let request = client.adapter().format_request(&prompt, &config);
    let response = client.submit_completion(&request, key, None).await?;
    let title = clean_title(response.text());
    if title.is_empty() {
        return Err(RelayError::InvalidResponseFormat {
            provider: client.provider(),
            message: "title response was empty".into(),
        });
    }
    Ok(title)
}
