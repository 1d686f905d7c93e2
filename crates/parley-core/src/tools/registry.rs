//! Tool registry: which tools are offered to the model and where each
//! call is executed.

use std::collections::HashMap;

use parley_types::llm::{ToolCall, ToolSpec};
use parley_types::tool::{
    CurrentTimeInput, ToolError, ToolExecution, ToolKind, WeatherInput, WebSearchInput,
};
use schemars::schema_for;

use super::executor::BoxToolExecutor;

/// Declaration of a known tool, or `None` for passthrough names.
pub fn tool_spec(kind: &ToolKind) -> Option<ToolSpec> {
    let (description, schema) = match kind {
        ToolKind::CurrentTime => (
            "Get the user's current local date and time.",
            schema_for!(CurrentTimeInput),
        ),
        ToolKind::Weather => (
            "Get the current weather and today's forecast for a place.",
            schema_for!(WeatherInput),
        ),
        ToolKind::WebSearch => (
            "Search the web for recent information. Returns titles, URLs, and snippets.",
            schema_for!(WebSearchInput),
        ),
        ToolKind::Unknown(_) => return None,
    };
    Some(ToolSpec {
        name: kind.name().to_string(),
        description: description.to_string(),
        input_schema: schema.to_value(),
    })
}

/// Registered server executors plus the fixed client-side tool set.
#[derive(Default)]
pub struct ToolRegistry {
    executors: HashMap<String, BoxToolExecutor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server executor. Replaces any executor of the same kind.
    pub fn register(&mut self, executor: BoxToolExecutor) {
        self.executors
            .insert(executor.kind().name().to_string(), executor);
    }

    /// Tools offered to the model: client tools always, server tools only
    /// when an executor is registered.
    pub fn specs(&self) -> Vec<ToolSpec> {
        [ToolKind::CurrentTime, ToolKind::Weather, ToolKind::WebSearch]
            .iter()
            .filter(|kind| match kind.execution() {
                ToolExecution::Server => self.executors.contains_key(kind.name()),
                _ => true,
            })
            .filter_map(tool_spec)
            .collect()
    }

    /// Where a call by this name runs. A server tool with no executor
    /// is passed through to the client.
    pub fn execution_for(&self, name: &str) -> ToolExecution {
        match ToolKind::from_name(name).execution() {
            ToolExecution::Server if !self.executors.contains_key(name) => {
                ToolExecution::Passthrough
            }
            other => other,
        }
    }

    /// Run a server-side call.
    pub async fn execute(&self, call: &ToolCall) -> Result<serde_json::Value, ToolError> {
        let executor = self
            .executors
            .get(&call.name)
            .ok_or_else(|| ToolError::NotExecutable(call.name.clone()))?;
        executor.execute(call.input.clone()).await
    }

    pub fn names(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}
