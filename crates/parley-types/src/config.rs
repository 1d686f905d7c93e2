//! Global configuration types for Parley.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls
//! providers, persona routing, pricing, allowances, and tool settings.

use serde::{Deserialize, Serialize};

use crate::llm::ModelRoute;

/// Top-level configuration for the Parley server.
///
/// Loaded from `~/.parley/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Allowance granted to newly created users, in cents.
    #[serde(default = "default_allowance_cents")]
    pub default_allowance_cents: i64,

    /// Maximum model steps per exchange when server-side tools are called.
    #[serde(default = "default_max_tool_steps")]
    pub max_tool_steps: u32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Generate a title after the first exchange of an untitled conversation.
    #[serde(default = "default_auto_title")]
    pub auto_title: bool,

    /// Overrides the built-in system prompt template.
    #[serde(default)]
    pub system_prompt_template: Option<String>,

    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    #[serde(default = "default_personas")]
    pub personas: Vec<PersonaRoute>,

    /// Persona used when the requested one is unknown.
    #[serde(default = "default_persona")]
    pub default_persona: String,

    /// Route used when a text-only persona receives image attachments.
    #[serde(default = "default_vision_route")]
    pub vision_route: ModelRoute,

    /// Pricing overrides, checked before the built-in table.
    #[serde(default)]
    pub model_pricing: Vec<ModelPricing>,

    #[serde(default)]
    pub search: SearchConfig,
}

fn default_allowance_cents() -> i64 {
    500
}

fn default_max_tool_steps() -> u32 {
    5
}

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_auto_title() -> bool {
    true
}

fn default_persona() -> String {
    "balanced".to_string()
}

fn default_vision_route() -> ModelRoute {
    ModelRoute::new("openai", "gpt-4o-mini")
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        },
        ProviderConfig {
            name: "groq".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
        },
    ]
}

fn default_personas() -> Vec<PersonaRoute> {
    vec![
        PersonaRoute {
            persona_id: "fast".to_string(),
            provider: "groq".to_string(),
            model_id: "llama-3.1-8b-instant".to_string(),
            free: true,
            vision: false,
        },
        PersonaRoute {
            persona_id: "balanced".to_string(),
            provider: "openai".to_string(),
            model_id: "gpt-4o-mini".to_string(),
            free: false,
            vision: true,
        },
        PersonaRoute {
            persona_id: "smart".to_string(),
            provider: "openai".to_string(),
            model_id: "gpt-4o".to_string(),
            free: false,
            vision: true,
        },
        PersonaRoute {
            persona_id: "reasoning".to_string(),
            provider: "openai".to_string(),
            model_id: "o3-mini".to_string(),
            free: false,
            vision: false,
        },
    ]
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_allowance_cents: default_allowance_cents(),
            max_tool_steps: default_max_tool_steps(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            auto_title: default_auto_title(),
            system_prompt_template: None,
            providers: default_providers(),
            personas: default_personas(),
            default_persona: default_persona(),
            vision_route: default_vision_route(),
            model_pricing: Vec::new(),
            search: SearchConfig::default(),
        }
    }
}

/// An OpenAI-compatible endpoint the server can stream from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

/// Routing table entry: UI persona to concrete provider/model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRoute {
    pub persona_id: String,
    pub provider: String,
    pub model_id: String,
    /// Free-tier model.
    #[serde(default)]
    pub free: bool,
    /// Model accepts image input.
    #[serde(default)]
    pub vision: bool,
}

impl PersonaRoute {
    pub fn route(&self) -> ModelRoute {
        ModelRoute::new(&self.provider, &self.model_id)
    }
}

/// Cost information for a specific provider/model pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Name of the provider (e.g., "openai", "groq").
    pub provider_name: String,
    /// Model name prefix (e.g., "gpt-4o-mini").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}

/// Web search tool backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_key_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.default_allowance_cents, 500);
        assert_eq!(config.max_tool_steps, 5);
        assert_eq!(config.default_persona, "balanced");
        assert!(config.personas.iter().any(|p| p.persona_id == "fast" && p.free && !p.vision));
        assert!(config.model_pricing.is_empty());
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_output_tokens, 4096);
        assert_eq!(config.vision_route, ModelRoute::new("openai", "gpt-4o-mini"));
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.search.api_key_env, "TAVILY_API_KEY");
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
default_allowance_cents = 1000
default_persona = "smart"
auto_title = false

[vision_route]
provider = "openai"
model_id = "gpt-4o"

[[personas]]
persona_id = "smart"
provider = "openai"
model_id = "gpt-4o"
vision = true

[[model_pricing]]
provider_name = "openai"
model_pattern = "gpt-4o"
input_cost_per_million = 2.5
output_cost_per_million = 10.0
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.default_allowance_cents, 1000);
        assert!(!config.auto_title);
        assert_eq!(config.personas.len(), 1);
        assert!(!config.personas[0].free);
        assert_eq!(config.vision_route.model_id, "gpt-4o");
        assert!((config.model_pricing[0].input_cost_per_million - 2.5).abs() < f64::EPSILON);
    }
}
