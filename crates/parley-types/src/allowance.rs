//! Allowance ledger and token usage audit types.
//!
//! Amounts are integer cents. A user's balance satisfies
//! `0 <= remaining_allowance <= alloted_allowance` at all times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ledger row per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceEntry {
    pub user_id: String,
    pub alloted_allowance: i64,
    pub remaining_allowance: i64,
    pub updated_at: DateTime<Utc>,
}

/// Audit record written once per settled exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageLog {
    pub id: Uuid,
    pub user_id: String,
    pub conversation_id: Uuid,
    pub turn_id: Option<Uuid>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub reasoning_tokens: u32,
    pub cached_tokens: u32,
    /// USD per million input tokens used for this charge.
    pub input_price_per_million: f64,
    /// USD per million output tokens used for this charge.
    pub output_price_per_million: f64,
    pub cost_cents: i64,
    pub created_at: DateTime<Utc>,
}
