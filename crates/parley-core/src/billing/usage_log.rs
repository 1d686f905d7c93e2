//! Token usage audit log repository trait.

use parley_types::allowance::TokenUsageLog;
use parley_types::error::RepositoryError;

pub trait UsageLogRepository: Send + Sync {
    fn insert_usage_log(
        &self,
        log: &TokenUsageLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Most recent entries for a user, newest first.
    fn list_usage_logs(
        &self,
        user_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<TokenUsageLog>, RepositoryError>> + Send;
}
