use std::sync::Arc;

use serde_json::json;

use super::{CapabilityContext, CapabilityDefinition, THINKING_MODE};
use crate::error::RelayError;
use crate::protocol::{FormattedRequest, ModelRegistry, ProviderKind};

pub const DEFAULT_BUDGET_TOKENS: u32 = 16_000;
pub const THINKING_PRIORITY: i32 = 10;

/// Extended reasoning for Claude models.
///
/// Adds `thinking: {type: "enabled", budget_tokens}` to the request when the
/// conversation enabled it. The budget always stays below `max_tokens`.
#[must_use]
pub fn thinking_mode_capability(
    default_budget: u32,
    models: Arc<ModelRegistry>,
) -> CapabilityDefinition {
    CapabilityDefinition::new(THINKING_MODE, THINKING_PRIORITY, move |provider, model| {
        supports_thinking(&models, provider, model)
    })
    .with_name("Thinking Mode")
    .with_request_middleware(move |request, ctx| apply_thinking(request, ctx, default_budget))
}

/// Registered models answer from their `supports_thinking` flag; unknown ids
/// fall back to a Claude name check.
#[must_use]
pub fn supports_thinking(models: &ModelRegistry, provider: ProviderKind, model: &str) -> bool {
    if provider != ProviderKind::Anthropic {
        return false;
    }
    match models.get(model) {
        Some(spec) => spec.supports_thinking,
        None => model.contains("claude"),
    }
}

fn apply_thinking(
    request: &FormattedRequest,
    ctx: &CapabilityContext<'_>,
    default_budget: u32,
) -> Result<FormattedRequest, RelayError> {
    let Some(config) = ctx.model_config.capabilities.thinking_mode() else {
        return Ok(request.clone());
    };
    if !config.enabled {
        return Ok(request.clone());
    }

    let requested = config.budget_tokens.unwrap_or(default_budget);
    let budget = requested.min(request.max_tokens.saturating_sub(1));
    if budget == 0 {
        return Err(RelayError::InvalidRequest(format!(
            "max_tokens {} leaves no room for a thinking budget",
            request.max_tokens
        )));
    }
    if budget < requested {
        tracing::debug!(
            "thinking budget {requested} lowered to {budget} for max_tokens {}",
            request.max_tokens
        );
    }

    let mut next = request.clone();
    next.set_extension(
        "thinking",
        json!({"type": "enabled", "budget_tokens": budget}),
    );
    Ok(next)
}
