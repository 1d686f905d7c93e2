//! Server-side tool executors.
//!
//! `weather` and `web_search` run on the server over `reqwest`. The clock
//! tool is client-executed and has no implementation here.

pub mod weather;
pub mod web_search;

use std::time::Duration;

use parley_core::tools::executor::BoxToolExecutor;
use parley_core::tools::registry::ToolRegistry;
use parley_types::config::GlobalConfig;
use parley_types::tool::ToolError;

use self::weather::WeatherTool;
use self::web_search::WebSearchTool;

pub(crate) fn http_client() -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| ToolError::Upstream(format!("failed to create HTTP client: {e}")))
}

pub(crate) fn upstream(e: reqwest::Error) -> ToolError {
    ToolError::Upstream(e.to_string())
}

/// Registry holding every server tool that can run with this config.
///
/// Web search is left out when its API key is missing; the model then never
/// sees it offered.
pub fn build_tool_registry(config: &GlobalConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    match WeatherTool::new() {
        Ok(tool) => registry.register(BoxToolExecutor::new(tool)),
        Err(e) => tracing::error!("weather tool unavailable: {e}"),
    }

    match std::env::var(&config.search.api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            match WebSearchTool::new(config.search.endpoint.clone(), key.into()) {
                Ok(tool) => registry.register(BoxToolExecutor::new(tool)),
                Err(e) => tracing::error!("web search tool unavailable: {e}"),
            }
        }
        _ => tracing::warn!(
            env = %config.search.api_key_env,
            "search API key not set; web_search disabled"
        ),
    }

    registry
}
