//! API key storage.
//!
//! Only the SHA-256 hash of a key is persisted. The plaintext is returned
//! once, from [`SqliteApiKeyStore::create_key`], and never again.

use chrono::Utc;
use parley_types::error::RepositoryError;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

const KEY_PREFIX: &str = "prly_";

/// Stored metadata of an API key (never the key itself).
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// First characters of the plaintext, for display.
    pub key_prefix: String,
    pub created_at: chrono::DateTime<Utc>,
    pub last_used_at: Option<chrono::DateTime<Utc>>,
}

/// Compute SHA-256 hash of an API key (lowercase hex).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

fn generate_key() -> String {
    let mut key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    format!(
        "{KEY_PREFIX}{}",
        key_bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()
    )
}

#[derive(Clone)]
pub struct SqliteApiKeyStore {
    pool: DatabasePool,
}

impl SqliteApiKeyStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Mint a key for `user_id`. Returns the plaintext and the stored record.
    pub async fn create_key(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<(String, ApiKeyRecord), RepositoryError> {
        let plaintext = generate_key();
        let record = ApiKeyRecord {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            key_prefix: plaintext.chars().take(KEY_PREFIX.len() + 6).collect(),
            created_at: Utc::now(),
            last_used_at: None,
        };

        sqlx::query(
            r#"INSERT INTO api_keys (id, user_id, name, key_prefix, key_hash, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.user_id)
        .bind(&record.name)
        .bind(&record.key_prefix)
        .bind(hash_api_key(&plaintext))
        .bind(format_datetime(&record.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok((plaintext, record))
    }

    /// Resolve a presented key to its owner's user id, recording the use.
    pub async fn authenticate(&self, presented: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT id, user_id FROM api_keys WHERE key_hash = ?")
            .bind(hash_api_key(presented))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id").map_err(query_error)?;
        let user_id: String = row.try_get("user_id").map_err(query_error)?;

        // Best effort: a failed timestamp update must not reject the request.
        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(format_datetime(&Utc::now()))
            .bind(&id)
            .execute(&self.pool.writer)
            .await
        {
            tracing::warn!(key_id = %id, "failed to record api key use: {e}");
        }

        Ok(Some(user_id))
    }

    pub async fn list_keys(&self, user_id: &str) -> Result<Vec<ApiKeyRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, key_prefix, created_at, last_used_at FROM api_keys WHERE user_id = ? ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(query_error)?;
            let created_at: String = row.try_get("created_at").map_err(query_error)?;
            let last_used_at: Option<String> = row.try_get("last_used_at").map_err(query_error)?;
            keys.push(ApiKeyRecord {
                id: parse_uuid(&id, "api key id")?,
                user_id: row.try_get("user_id").map_err(query_error)?,
                name: row.try_get("name").map_err(query_error)?,
                key_prefix: row.try_get("key_prefix").map_err(query_error)?,
                created_at: parse_datetime(&created_at)?,
                last_used_at: last_used_at.as_deref().map(parse_datetime).transpose()?,
            });
        }
        Ok(keys)
    }
}
