//! SQLite allowance repository implementation.
//!
//! The deduction is a single `UPDATE ... RETURNING` that floors at zero, so
//! concurrent deductions for one user never interleave a read and a write.

use chrono::Utc;
use parley_core::billing::ledger::AllowanceRepository;
use parley_types::allowance::AllowanceEntry;
use parley_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

/// SQLite-backed implementation of `AllowanceRepository`.
#[derive(Clone)]
pub struct SqliteAllowanceRepository {
    pool: DatabasePool,
}

impl SqliteAllowanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct AllowanceRow {
    user_id: String,
    alloted_allowance: i64,
    remaining_allowance: i64,
    updated_at: String,
}

impl AllowanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            alloted_allowance: row.try_get("alloted_allowance")?,
            remaining_allowance: row.try_get("remaining_allowance")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_entry(self) -> Result<AllowanceEntry, RepositoryError> {
        Ok(AllowanceEntry {
            user_id: self.user_id,
            alloted_allowance: self.alloted_allowance,
            remaining_allowance: self.remaining_allowance,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

impl AllowanceRepository for SqliteAllowanceRepository {
    async fn get_allowance(&self, user_id: &str) -> Result<Option<AllowanceEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM allowances WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => Ok(Some(AllowanceRow::from_row(&row).map_err(query_error)?.into_entry()?)),
            None => Ok(None),
        }
    }

    async fn deduct_allowance(&self, user_id: &str, cost_cents: i64) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            r#"UPDATE allowances
               SET remaining_allowance = MAX(remaining_allowance - ?, 0), updated_at = ?
               WHERE user_id = ?
               RETURNING remaining_allowance"#,
        )
        .bind(cost_cents)
        .bind(format_datetime(&Utc::now()))
        .bind(user_id)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => row.try_get("remaining_allowance").map_err(query_error),
            None => {
                tracing::debug!(user_id, "no allowance row to deduct from");
                Ok(0)
            }
        }
    }

    async fn set_allowance(&self, user_id: &str, cents: i64) -> Result<AllowanceEntry, RepositoryError> {
        let row = sqlx::query(
            r#"INSERT INTO allowances (user_id, alloted_allowance, remaining_allowance, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET
                   alloted_allowance = excluded.alloted_allowance,
                   remaining_allowance = excluded.remaining_allowance,
                   updated_at = excluded.updated_at
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(cents)
        .bind(cents)
        .bind(format_datetime(&Utc::now()))
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)?;

        AllowanceRow::from_row(&row).map_err(query_error)?.into_entry()
    }
}
