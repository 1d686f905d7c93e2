//! Conversation turn types for Parley.
//!
//! A turn is one persisted message in a conversation, sent either by the user
//! or by the assistant. Turns never carry a position index: their order is
//! implied by the `previous_turn_id` pointer and recovered on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::llm::{StopReason, Usage};

/// Who authored a turn.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (sender_type IN ('user', 'assistant'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Assistant,
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderType::User => write!(f, "user"),
            SenderType::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SenderType::User),
            "assistant" => Ok(SenderType::Assistant),
            other => Err(format!("invalid sender type: '{other}'")),
        }
    }
}

/// One typed part of a turn's content.
///
/// The core treats parts as opaque beyond serialization, with two exceptions:
/// text parts are concatenated for titles and history, and file parts are
/// inspected for image attachments when routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    File {
        url: String,
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// In-band failure marker (provider or stream error mid-exchange).
    Error {
        message: String,
    },
}

impl TurnPart {
    pub fn text(text: impl Into<String>) -> Self {
        TurnPart::Text { text: text.into() }
    }

    /// True for file parts whose media type is an image.
    pub fn is_image(&self) -> bool {
        matches!(self, TurnPart::File { media_type, .. } if media_type.starts_with("image/"))
    }
}

/// Per-step detail for multi-step (tool calling) assistant turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDetail {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<StopReason>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_names: Vec<String>,
}

/// Metadata carried alongside a turn's content.
///
/// Assistant turns record model identity, finish reason, token usage, the
/// tools invoked, and per-step detail. User turns carry at most client hints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_invoked: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_hints: Option<serde_json::Value>,
}

/// A single persisted message in a conversation.
///
/// Within one conversation the turns form a singly linked list rooted at the
/// unique turn whose `previous_turn_id` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_type: SenderType,
    pub content: Vec<TurnPart>,
    pub previous_turn_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: TurnMetadata,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    pub fn has_image_attachments(&self) -> bool {
        self.content.iter().any(TurnPart::is_image)
    }
}

/// Replacement content and metadata for a continuation update.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnUpdate {
    pub content: Vec<TurnPart>,
    pub metadata: TurnMetadata,
}

/// Concatenate the text parts of a content sequence.
pub fn collect_text(parts: &[TurnPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            TurnPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}
