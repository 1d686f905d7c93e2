//! Conversation and directory page types for Parley.
//!
//! A conversation is a named, owned chat thread. Conversations are never
//! hard-deleted: `deleted_at` marks them as gone from every listing and
//! turn-retrieval path while keeping the rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat thread owned by a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub owner_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Sort key of the last item on a directory page.
///
/// The next page holds items strictly after this key under the
/// `(updated_at DESC, id DESC)` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub updated_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PageCursor {
    pub fn of(conversation: &Conversation) -> Self {
        Self {
            updated_at: conversation.updated_at,
            id: conversation.id,
        }
    }

    /// Whether `conversation` sorts strictly after this cursor.
    pub fn precedes(&self, conversation: &Conversation) -> bool {
        conversation.updated_at < self.updated_at
            || (conversation.updated_at == self.updated_at && conversation.id < self.id)
    }
}

/// One page of a user's conversation directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub items: Vec<Conversation>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub total_count: u64,
}
