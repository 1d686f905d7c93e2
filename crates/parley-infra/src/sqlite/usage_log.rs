//! SQLite token usage log repository implementation.

use parley_core::billing::usage_log::UsageLogRepository;
use parley_types::allowance::TokenUsageLog;
use parley_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

/// SQLite-backed implementation of `UsageLogRepository`.
#[derive(Clone)]
pub struct SqliteUsageLogRepository {
    pool: DatabasePool,
}

impl SqliteUsageLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct UsageLogRow {
    id: String,
    user_id: String,
    conversation_id: String,
    turn_id: Option<String>,
    provider: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    reasoning_tokens: i64,
    cached_tokens: i64,
    input_price_per_million: f64,
    output_price_per_million: f64,
    cost_cents: i64,
    created_at: String,
}

impl UsageLogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            conversation_id: row.try_get("conversation_id")?,
            turn_id: row.try_get("turn_id")?,
            provider: row.try_get("provider")?,
            model: row.try_get("model")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            reasoning_tokens: row.try_get("reasoning_tokens")?,
            cached_tokens: row.try_get("cached_tokens")?,
            input_price_per_million: row.try_get("input_price_per_million")?,
            output_price_per_million: row.try_get("output_price_per_million")?,
            cost_cents: row.try_get("cost_cents")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_log(self) -> Result<TokenUsageLog, RepositoryError> {
        Ok(TokenUsageLog {
            id: parse_uuid(&self.id, "usage log id")?,
            user_id: self.user_id,
            conversation_id: parse_uuid(&self.conversation_id, "conversation_id")?,
            turn_id: self
                .turn_id
                .as_deref()
                .map(|id| parse_uuid(id, "turn_id"))
                .transpose()?,
            provider: self.provider,
            model: self.model,
            input_tokens: self.input_tokens as u32,
            output_tokens: self.output_tokens as u32,
            reasoning_tokens: self.reasoning_tokens as u32,
            cached_tokens: self.cached_tokens as u32,
            input_price_per_million: self.input_price_per_million,
            output_price_per_million: self.output_price_per_million,
            cost_cents: self.cost_cents,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl UsageLogRepository for SqliteUsageLogRepository {
    async fn insert_usage_log(&self, log: &TokenUsageLog) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO token_usage_logs (
                   id, user_id, conversation_id, turn_id, provider, model,
                   input_tokens, output_tokens, reasoning_tokens, cached_tokens,
                   input_price_per_million, output_price_per_million, cost_cents, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(&log.user_id)
        .bind(log.conversation_id.to_string())
        .bind(log.turn_id.map(|id| id.to_string()))
        .bind(&log.provider)
        .bind(&log.model)
        .bind(i64::from(log.input_tokens))
        .bind(i64::from(log.output_tokens))
        .bind(i64::from(log.reasoning_tokens))
        .bind(i64::from(log.cached_tokens))
        .bind(log.input_price_per_million)
        .bind(log.output_price_per_million)
        .bind(log.cost_cents)
        .bind(format_datetime(&log.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn list_usage_logs(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<TokenUsageLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM token_usage_logs WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            logs.push(UsageLogRow::from_row(row).map_err(query_error)?.into_log()?);
        }
        Ok(logs)
    }
}
