//! Turn and conversation repository traits.
//!
//! Follows the RPITIT pattern: implementations live in parley-infra
//! (e.g., `SqliteTurnRepository`) and in-memory fakes in tests.

use chrono::{DateTime, Utc};
use parley_types::conversation::{Conversation, PageCursor};
use parley_types::error::RepositoryError;
use parley_types::turn::{Turn, TurnUpdate};
use uuid::Uuid;

/// Persistence of individual conversation turns.
pub trait TurnRepository: Send + Sync {
    /// Insert a new turn.
    ///
    /// Returns `RepositoryError::Conflict` when another turn already claims
    /// the same predecessor in the same conversation.
    fn insert_turn(
        &self,
        turn: &Turn,
    ) -> impl std::future::Future<Output = Result<Uuid, RepositoryError>> + Send;

    /// Replace a turn's content and metadata (continuation update).
    fn update_turn(
        &self,
        turn_id: &Uuid,
        update: &TurnUpdate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All turns of a conversation, in no particular order.
    fn get_turns_for_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Turn>, RepositoryError>> + Send;

    /// The last turn of the chain walked from the root, matching the tail of
    /// `reconstruct`. Orphans are never returned. `None` when there is no root.
    fn get_latest_turn(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Turn>, RepositoryError>> + Send;
}

/// Persistence of conversation rows.
pub trait ConversationRepository: Send + Sync {
    fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Point lookup by id. Returns soft-deleted rows too; callers filter.
    fn get_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Live conversations of `owner_id` ordered by `(updated_at DESC, id DESC)`,
    /// strictly after `after` when given, at most `limit` rows.
    fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        after: Option<&PageCursor>,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Number of live conversations of `owner_id`.
    fn count_conversations(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    fn update_title(
        &self,
        conversation_id: &Uuid,
        title: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Set `deleted_at`. `NotFound` if the row is missing or already deleted.
    fn soft_delete_conversation(
        &self,
        conversation_id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Bump `updated_at`.
    fn touch_conversation(
        &self,
        conversation_id: &Uuid,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
