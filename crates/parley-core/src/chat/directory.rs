//! Conversation directory: ownership-checked conversation management and
//! cursor-paginated listing.
//!
//! Listing fetches `limit + 1` rows to learn whether another page exists,
//! while an exact total runs in parallel as a separate count.

use chrono::Utc;
use parley_types::conversation::{Conversation, ConversationPage, PageCursor};
use parley_types::error::ConversationError;
use parley_types::turn::Turn;
use tracing::info;
use uuid::Uuid;

use super::chain::reconstruct;
use super::cursor::{decode_cursor, encode_cursor};
use super::repository::{ConversationRepository, TurnRepository};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
const MAX_TITLE_CHARS: usize = 200;

/// Owner-scoped access to conversations and their turns.
///
/// Every conversation-scoped operation goes through [`ConversationDirectory::get`],
/// so missing, soft-deleted, and foreign conversations are indistinguishable
/// to the caller.
#[derive(Clone)]
pub struct ConversationDirectory<C: ConversationRepository, T: TurnRepository> {
    conversations: C,
    turns: T,
}

impl<C: ConversationRepository, T: TurnRepository> ConversationDirectory<C, T> {
    pub fn new(conversations: C, turns: T) -> Self {
        Self {
            conversations,
            turns,
        }
    }

    pub fn conversations(&self) -> &C {
        &self.conversations
    }

    pub fn turns(&self) -> &T {
        &self.turns
    }

    /// One page of `owner_id`'s live conversations, most recent first.
    pub async fn list(
        &self,
        owner_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<ConversationPage, ConversationError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let after = cursor.map(decode_cursor).transpose()?;

        let (rows, total_count) = tokio::try_join!(
            self.conversations
                .list_conversations(owner_id, limit + 1, after.as_ref()),
            self.conversations.count_conversations(owner_id),
        )?;

        Ok(assemble_page(rows, limit, total_count))
    }

    pub async fn create(
        &self,
        owner_id: &str,
        title: Option<&str>,
    ) -> Result<Conversation, ConversationError> {
        let title = title.map(validate_title).transpose()?;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::now_v7(),
            owner_id: owner_id.to_string(),
            title,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.conversations.create_conversation(&conversation).await?;
        info!(conversation_id = %conversation.id, owner_id, "Conversation created");
        Ok(conversation)
    }

    /// A live conversation owned by `owner_id`.
    pub async fn get(
        &self,
        owner_id: &str,
        conversation_id: &Uuid,
    ) -> Result<Conversation, ConversationError> {
        match self.conversations.get_conversation(conversation_id).await? {
            Some(c) if c.owner_id == owner_id && !c.is_deleted() => Ok(c),
            _ => Err(ConversationError::NotFound),
        }
    }

    pub async fn rename(
        &self,
        owner_id: &str,
        conversation_id: &Uuid,
        title: &str,
    ) -> Result<Conversation, ConversationError> {
        let title = validate_title(title)?;
        let mut conversation = self.get(owner_id, conversation_id).await?;
        self.conversations
            .update_title(conversation_id, &title)
            .await?;
        conversation.title = Some(title);
        Ok(conversation)
    }

    pub async fn soft_delete(
        &self,
        owner_id: &str,
        conversation_id: &Uuid,
    ) -> Result<(), ConversationError> {
        self.get(owner_id, conversation_id).await?;
        self.conversations
            .soft_delete_conversation(conversation_id, Utc::now())
            .await?;
        info!(conversation_id = %conversation_id, "Conversation soft-deleted");
        Ok(())
    }

    /// The conversation's turns in chain order.
    pub async fn get_messages(
        &self,
        owner_id: &str,
        conversation_id: &Uuid,
    ) -> Result<Vec<Turn>, ConversationError> {
        self.get(owner_id, conversation_id).await?;
        let turns = self
            .turns
            .get_turns_for_conversation(conversation_id)
            .await?;
        Ok(reconstruct(turns))
    }
}

/// Trim the peeked extra row and derive the next cursor.
fn assemble_page(mut rows: Vec<Conversation>, limit: u32, total_count: u64) -> ConversationPage {
    let has_more = rows.len() > limit as usize;
    rows.truncate(limit as usize);
    let next_cursor = if has_more {
        rows.last().map(|last| encode_cursor(&PageCursor::of(last)))
    } else {
        None
    };
    ConversationPage {
        items: rows,
        has_more,
        next_cursor,
        total_count,
    }
}

fn validate_title(title: &str) -> Result<String, ConversationError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ConversationError::InvalidTitle(
            "title must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(ConversationError::InvalidTitle(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}
