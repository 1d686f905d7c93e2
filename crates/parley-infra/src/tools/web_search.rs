//! `web_search` tool against a Tavily-style search endpoint.
//!
//! Request: `POST {endpoint}` with `{api_key, query, max_results}`.
//! Response: `{results: [{title, url, content}], answer?}`.

use parley_core::tools::executor::ToolExecutor;
use parley_types::tool::{ToolError, ToolKind, WebSearchInput};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{http_client, upstream};

const DEFAULT_RESULTS: u8 = 5;
const MAX_RESULTS: u8 = 10;
const SNIPPET_CHARS: usize = 500;

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u8,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

fn parse_input(input: serde_json::Value) -> Result<(String, u8), ToolError> {
    let parsed: WebSearchInput =
        serde_json::from_value(input).map_err(|e| ToolError::InvalidInput(e.to_string()))?;
    let query = parsed.query.trim().to_string();
    if query.is_empty() {
        return Err(ToolError::InvalidInput("query must not be empty".to_string()));
    }
    let max_results = parsed.max_results.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS);
    Ok((query, max_results))
}

fn render(query: &str, response: SearchResponse) -> serde_json::Value {
    let results: Vec<serde_json::Value> = response
        .results
        .into_iter()
        .map(|hit| {
            json!({
                "title": hit.title,
                "url": hit.url,
                "snippet": hit.content.chars().take(SNIPPET_CHARS).collect::<String>(),
            })
        })
        .collect();
    json!({
        "query": query,
        "answer": response.answer,
        "results": results,
    })
}

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl WebSearchTool {
    pub fn new(endpoint: String, api_key: SecretString) -> Result<Self, ToolError> {
        Ok(Self {
            client: http_client()?,
            endpoint,
            api_key,
        })
    }
}

impl ToolExecutor for WebSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let (query, max_results) = parse_input(input)?;

        let response: SearchResponse = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest {
                api_key: self.api_key.expose_secret(),
                query: &query,
                max_results,
            })
            .send()
            .await
            .map_err(upstream)?
            .error_for_status()
            .map_err(upstream)?
            .json()
            .await
            .map_err(upstream)?;

        tracing::debug!(query = %query, hits = response.results.len(), "web search complete");
        Ok(render(&query, response))
    }
}
