//! Provider registry for runtime provider lookup.

use std::collections::HashMap;

use super::box_provider::BoxLlmProvider;

/// Registry of available LLM providers, indexed by the provider name used
/// in model routes.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, BoxLlmProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under the given name, replacing any existing one.
    pub fn register(&mut self, name: impl Into<String>, provider: BoxLlmProvider) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&BoxLlmProvider> {
        self.providers.get(name)
    }

    /// Registered provider names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
