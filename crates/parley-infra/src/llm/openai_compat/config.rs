//! Configuration and per-provider defaults for OpenAI-compatible providers.
//!
//! Every provider Parley routes to speaks the chat completions protocol; they
//! differ only in base URL and capabilities. Unlike a per-bot client, the
//! model id is chosen per request by the router, so it is not part of this
//! config.

use parley_types::config::ProviderConfig;
use parley_types::llm::ProviderCapabilities;
use secrecy::SecretString;

/// Configuration for one OpenAI-compatible endpoint.
pub struct OpenAiCompatConfig {
    /// Provider name used in model routes (e.g., "openai", "groq").
    pub provider_name: String,
    /// Base URL up to and including the version segment.
    pub base_url: String,
    pub api_key: SecretString,
    pub capabilities: ProviderCapabilities,
}

impl OpenAiCompatConfig {
    /// Build from a configured provider entry, picking capabilities by name.
    pub fn from_provider(config: &ProviderConfig, api_key: SecretString) -> Self {
        Self {
            provider_name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            capabilities: capabilities_for(&config.name),
        }
    }
}

/// Known capability profiles; unknown providers get a conservative one.
pub fn capabilities_for(provider_name: &str) -> ProviderCapabilities {
    match provider_name {
        "openai" => ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            vision: true,
            max_output_tokens: 16_384,
        },
        "groq" => ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            vision: false,
            max_output_tokens: 8_192,
        },
        "mistral" => ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            vision: true,
            max_output_tokens: 32_768,
        },
        _ => ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            vision: false,
            max_output_tokens: 4_096,
        },
    }
}
