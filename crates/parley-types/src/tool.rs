//! Tool kinds and tool input shapes.
//!
//! Tools form a closed set plus an explicit passthrough variant for names
//! the server does not recognize. Each known tool has a typed input whose
//! JSON Schema is offered to the model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecution {
    /// Executed by the server within the exchange.
    Server,
    /// Needs the caller's local context; the client answers it.
    Client,
    /// Unrecognized by the server; forwarded untouched.
    Passthrough,
}

impl fmt::Display for ToolExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolExecution::Server => write!(f, "server"),
            ToolExecution::Client => write!(f, "client"),
            ToolExecution::Passthrough => write!(f, "passthrough"),
        }
    }
}

/// The tools Parley knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolKind {
    CurrentTime,
    Weather,
    WebSearch,
    Unknown(String),
}

impl ToolKind {
    pub const CURRENT_TIME: &'static str = "current_time";
    pub const WEATHER: &'static str = "weather";
    pub const WEB_SEARCH: &'static str = "web_search";

    /// Resolve a tool name as emitted by the model.
    pub fn from_name(name: &str) -> Self {
        match name {
            Self::CURRENT_TIME => ToolKind::CurrentTime,
            Self::WEATHER => ToolKind::Weather,
            Self::WEB_SEARCH => ToolKind::WebSearch,
            other => ToolKind::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolKind::CurrentTime => Self::CURRENT_TIME,
            ToolKind::Weather => Self::WEATHER,
            ToolKind::WebSearch => Self::WEB_SEARCH,
            ToolKind::Unknown(name) => name,
        }
    }

    pub fn execution(&self) -> ToolExecution {
        match self {
            ToolKind::CurrentTime => ToolExecution::Client,
            ToolKind::Weather | ToolKind::WebSearch => ToolExecution::Server,
            ToolKind::Unknown(_) => ToolExecution::Passthrough,
        }
    }
}

/// Input for the `current_time` tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CurrentTimeInput {
    /// IANA timezone name; the caller's local zone when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Input for the `weather` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeatherInput {
    /// City or place name, e.g. "Lisbon".
    pub location: String,
}

/// Input for the `web_search` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebSearchInput {
    /// Search query.
    pub query: String,
    /// Maximum number of results (1-10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u8>,
}

/// Errors from server-side tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    #[error("tool '{0}' has no server executor")]
    NotExecutable(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("tool not configured: {0}")]
    NotConfigured(String),
}
