//! SQLite turn repository implementation.
//!
//! Turn content and metadata are stored as JSON text. The unique index on
//! `(conversation_id, COALESCE(previous_turn_id, ''))` rejects a second
//! successor for the same predecessor; that rejection surfaces as
//! `RepositoryError::Conflict`.

use parley_core::chat::repository::TurnRepository;
use parley_types::error::RepositoryError;
use parley_types::turn::{SenderType, Turn, TurnMetadata, TurnPart, TurnUpdate};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `TurnRepository`.
#[derive(Clone)]
pub struct SqliteTurnRepository {
    pool: DatabasePool,
}

impl SqliteTurnRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct TurnRow {
    id: String,
    conversation_id: String,
    sender_type: String,
    content: String,
    previous_turn_id: Option<String>,
    metadata: String,
    created_at: String,
}

impl TurnRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_type: row.try_get("sender_type")?,
            content: row.try_get("content")?,
            previous_turn_id: row.try_get("previous_turn_id")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_turn(self) -> Result<Turn, RepositoryError> {
        let sender_type: SenderType = self
            .sender_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let content: Vec<TurnPart> = serde_json::from_str(&self.content)
            .map_err(|e| RepositoryError::Query(format!("invalid turn content: {e}")))?;
        let metadata: TurnMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid turn metadata: {e}")))?;

        Ok(Turn {
            id: parse_uuid(&self.id, "turn id")?,
            conversation_id: parse_uuid(&self.conversation_id, "conversation_id")?,
            sender_type,
            content,
            previous_turn_id: self
                .previous_turn_id
                .as_deref()
                .map(|id| parse_uuid(id, "previous_turn_id"))
                .transpose()?,
            metadata,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

impl TurnRepository for SqliteTurnRepository {
    async fn insert_turn(&self, turn: &Turn) -> Result<Uuid, RepositoryError> {
        sqlx::query(
            r#"INSERT INTO turns (id, conversation_id, sender_type, content, previous_turn_id, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(turn.id.to_string())
        .bind(turn.conversation_id.to_string())
        .bind(turn.sender_type.to_string())
        .bind(to_json(&turn.content)?)
        .bind(turn.previous_turn_id.map(|id| id.to_string()))
        .bind(to_json(&turn.metadata)?)
        .bind(format_datetime(&turn.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => RepositoryError::Conflict(format!(
                "predecessor {} already has a successor",
                turn.previous_turn_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "(root)".to_string())
            )),
            _ => query_error(e),
        })?;

        Ok(turn.id)
    }

    async fn update_turn(&self, turn_id: &Uuid, update: &TurnUpdate) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE turns SET content = ?, metadata = ? WHERE id = ?")
            .bind(to_json(&update.content)?)
            .bind(to_json(&update.metadata)?)
            .bind(turn_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_turns_for_conversation(
        &self,
        conversation_id: &Uuid,
    ) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM turns WHERE conversation_id = ?")
            .bind(conversation_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in &rows {
            let turn_row = TurnRow::from_row(row).map_err(query_error)?;
            turns.push(turn_row.into_turn()?);
        }
        Ok(turns)
    }

    async fn get_latest_turn(&self, conversation_id: &Uuid) -> Result<Option<Turn>, RepositoryError> {
        let row = sqlx::query(
            r#"WITH RECURSIVE chain(id, depth) AS (
                   SELECT id, 0 FROM (
                       SELECT id FROM turns
                       WHERE conversation_id = ?1 AND previous_turn_id IS NULL
                       ORDER BY id LIMIT 1
                   )
                   UNION
                   SELECT (SELECT n.id FROM turns n
                           WHERE n.conversation_id = ?1 AND n.previous_turn_id = c.id
                           ORDER BY n.id LIMIT 1),
                          c.depth + 1
                   FROM chain c
                   WHERE EXISTS (SELECT 1 FROM turns n
                                 WHERE n.conversation_id = ?1 AND n.previous_turn_id = c.id)
                     AND c.depth < (SELECT COUNT(*) FROM turns WHERE conversation_id = ?1)
               )
               SELECT t.* FROM chain c JOIN turns t ON t.id = c.id
               ORDER BY c.depth DESC
               LIMIT 1"#,
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let turn_row = TurnRow::from_row(&row).map_err(query_error)?;
                Ok(Some(turn_row.into_turn()?))
            }
            None => Ok(None),
        }
    }
}
