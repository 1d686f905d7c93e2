//! Exchange request, event, and outcome types.

use parley_types::config::{GlobalConfig, ModelPricing};
use parley_types::error::RepositoryError;
use parley_types::llm::{StopReason, Usage};
use parley_types::tool::ToolExecution;
use parley_types::turn::{SenderType, TurnPart};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent::prompt::UserPreferences;

/// One message of the client's local view of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub role: SenderType,
    pub content: Vec<TurnPart>,
    /// Client-supplied hints, stored on the user turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl InboundMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: SenderType::User,
            content: vec![TurnPart::text(text)],
            metadata: None,
        }
    }
}

/// Everything needed to run one chat exchange.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub user_id: String,
    pub conversation_id: Uuid,
    pub persona_id: String,
    pub messages: Vec<InboundMessage>,
    pub preferences: UserPreferences,
}

/// Incremental events of an exchange, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    Start {
        conversation_id: Uuid,
        user_turn_id: Option<Uuid>,
        provider: String,
        model: String,
    },
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
        execution: ToolExecution,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        output: serde_json::Value,
        is_error: bool,
    },
    Error {
        message: String,
    },
    Finish {
        assistant_turn_id: Option<Uuid>,
        finish_reason: StopReason,
        usage: Usage,
        cost_cents: i64,
    },
}

impl ExchangeEvent {
    /// Event name on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeEvent::Start { .. } => "start",
            ExchangeEvent::TextDelta { .. } => "text_delta",
            ExchangeEvent::ReasoningDelta { .. } => "reasoning_delta",
            ExchangeEvent::ToolCall { .. } => "tool_call",
            ExchangeEvent::ToolResult { .. } => "tool_result",
            ExchangeEvent::Error { .. } => "error",
            ExchangeEvent::Finish { .. } => "finish",
        }
    }
}

/// Result of a settled exchange, returned by the background task.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub user_turn_id: Option<Uuid>,
    /// `None` if persisting the assistant turn failed.
    pub assistant_turn_id: Option<Uuid>,
    pub finish_reason: StopReason,
    pub usage: Usage,
    pub cost_cents: i64,
    /// `None` if the deduction failed.
    pub remaining_allowance: Option<i64>,
    pub title: Option<String>,
}

/// A running exchange.
///
/// Dropping `events` does not stop the exchange: the task keeps streaming,
/// persists the assistant turn, and settles billing.
#[derive(Debug)]
pub struct ExchangeHandle {
    pub events: UnboundedReceiver<ExchangeEvent>,
    pub task: JoinHandle<ExchangeOutcome>,
}

/// Hard failures raised before any model call.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("routing failed: {0}")]
    Routing(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

/// Tunables for the exchange loop, taken from `GlobalConfig`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_tool_steps: u32,
    pub max_output_tokens: u32,
    pub temperature: f64,
    pub system_prompt_template: Option<String>,
    pub model_pricing: Vec<ModelPricing>,
    pub auto_title: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_tool_steps: config.max_tool_steps.max(1),
            max_output_tokens: config.max_output_tokens,
            temperature: config.temperature,
            system_prompt_template: config.system_prompt_template.clone(),
            model_pricing: config.model_pricing.clone(),
            auto_title: config.auto_title,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}
