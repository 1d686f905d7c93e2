//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `parley-core`. Listing uses
//! keyset pagination over `(updated_at DESC, id DESC)`; timestamps are stored
//! fixed-width so the tuple comparison can run on the raw strings.

use chrono::{DateTime, Utc};
use parley_core::chat::repository::ConversationRepository;
use parley_types::conversation::{Conversation, PageCursor};
use parley_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `ConversationRepository`.
#[derive(Clone)]
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ConversationRow {
    id: String,
    owner_id: String,
    title: Option<String>,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl ConversationRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        Ok(Conversation {
            id: parse_uuid(&self.id, "conversation id")?,
            owner_id: self.owner_id,
            title: self.title,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            deleted_at: self.deleted_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn collect(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Conversation>, RepositoryError> {
    let mut conversations = Vec::with_capacity(rows.len());
    for row in rows {
        let conversation_row = ConversationRow::from_row(row).map_err(query_error)?;
        conversations.push(conversation_row.into_conversation()?);
    }
    Ok(conversations)
}

impl ConversationRepository for SqliteConversationRepository {
    async fn create_conversation(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO conversations (id, owner_id, title, created_at, updated_at, deleted_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.owner_id)
        .bind(&conversation.title)
        .bind(format_datetime(&conversation.created_at))
        .bind(format_datetime(&conversation.updated_at))
        .bind(conversation.deleted_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(conversation_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let conversation_row = ConversationRow::from_row(&row).map_err(query_error)?;
                Ok(Some(conversation_row.into_conversation()?))
            }
            None => Ok(None),
        }
    }

    async fn list_conversations(
        &self,
        owner_id: &str,
        limit: u32,
        after: Option<&PageCursor>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = match after {
            Some(cursor) => {
                let updated_at = format_datetime(&cursor.updated_at);
                sqlx::query(
                    r#"SELECT * FROM conversations
                       WHERE owner_id = ? AND deleted_at IS NULL
                         AND (updated_at < ? OR (updated_at = ? AND id < ?))
                       ORDER BY updated_at DESC, id DESC
                       LIMIT ?"#,
                )
                .bind(owner_id)
                .bind(&updated_at)
                .bind(&updated_at)
                .bind(cursor.id.to_string())
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    r#"SELECT * FROM conversations
                       WHERE owner_id = ? AND deleted_at IS NULL
                       ORDER BY updated_at DESC, id DESC
                       LIMIT ?"#,
                )
                .bind(owner_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_error)?;

        collect(&rows)
    }

    async fn count_conversations(&self, owner_id: &str) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM conversations WHERE owner_id = ? AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let count: i64 = row.try_get("cnt").map_err(query_error)?;
        Ok(count.max(0) as u64)
    }

    async fn update_title(&self, conversation_id: &Uuid, title: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
            .bind(title)
            .bind(conversation_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn soft_delete_conversation(
        &self,
        conversation_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(format_datetime(&at))
        .bind(conversation_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_conversation(
        &self,
        conversation_id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(format_datetime(&at))
            .bind(conversation_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
