//! Query parameter extractors for list endpoints.

use serde::Deserialize;

use parley_core::chat::directory::DEFAULT_PAGE_SIZE;

/// Query parameters for the conversation list endpoint.
#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    /// Page size; clamped by the directory.
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Opaque `nextCursor` from the previous page.
    pub cursor: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}
