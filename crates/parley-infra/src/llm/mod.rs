//! LLM provider implementations.
//!
//! Every configured provider is an OpenAI-compatible endpoint. The
//! [`build_registry`] factory resolves each provider's API key from its
//! environment variable and registers the ones that can authenticate.

pub mod openai_compat;

use secrecy::SecretString;

use parley_core::llm::box_provider::BoxLlmProvider;
use parley_core::llm::registry::ProviderRegistry;
use parley_types::config::{GlobalConfig, ProviderConfig};
use parley_types::llm::LlmError;

use self::openai_compat::OpenAiCompatibleProvider;
use self::openai_compat::config::OpenAiCompatConfig;

/// Create a [`BoxLlmProvider`] from a provider entry and its resolved key.
pub fn create_provider(
    config: &ProviderConfig,
    api_key: SecretString,
) -> Result<BoxLlmProvider, LlmError> {
    let provider = OpenAiCompatibleProvider::new(OpenAiCompatConfig::from_provider(config, api_key))?;
    Ok(BoxLlmProvider::new(provider))
}

/// Build the registry from `config.providers`, looking keys up with `lookup`.
///
/// Providers whose key is missing or empty are skipped with a warning, so a
/// deployment only needs keys for the providers its personas use.
pub fn build_registry_with<F>(config: &GlobalConfig, lookup: F) -> ProviderRegistry
where
    F: Fn(&str) -> Option<String>,
{
    let mut registry = ProviderRegistry::new();

    for provider in &config.providers {
        let Some(key) = lookup(&provider.api_key_env).filter(|k| !k.trim().is_empty()) else {
            tracing::warn!(
                provider = %provider.name,
                env = %provider.api_key_env,
                "API key not set; provider disabled"
            );
            continue;
        };

        match create_provider(provider, SecretString::from(key)) {
            Ok(boxed) => {
                tracing::info!(provider = %provider.name, base_url = %provider.base_url, "provider registered");
                registry.register(provider.name.clone(), boxed);
            }
            Err(e) => {
                tracing::error!(provider = %provider.name, "failed to create provider: {e}");
            }
        }
    }

    registry
}

/// [`build_registry_with`] over the process environment.
pub fn build_registry(config: &GlobalConfig) -> ProviderRegistry {
    build_registry_with(config, |name| std::env::var(name).ok())
}
