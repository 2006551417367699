//! Language model providers for SQLPilot.
//!
//! All providers implement the `sqlpilot_core::Provider` trait.

pub mod anthropic;

use sqlpilot_config::AppConfig;
use sqlpilot_core::error::ProviderError;
use sqlpilot_core::provider::Provider;
use std::sync::Arc;

pub use anthropic::AnthropicProvider;

/// Build the model provider from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "no API key (set api_key in config.toml, SQLPILOT_API_KEY or ANTHROPIC_API_KEY)".into(),
        )
    })?;

    let mut provider = AnthropicProvider::new(api_key)?;
    if let Some(url) = &config.api_url {
        provider = provider.with_base_url(url);
    }
    tracing::debug!(base_url = config.api_url.as_deref().unwrap_or(anthropic::DEFAULT_BASE_URL), "Anthropic provider configured");
    Ok(Arc::new(provider))
}
