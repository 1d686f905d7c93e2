//! Allowance ledger.
//!
//! Balances live in the datastore and are only mutated through its
//! single-statement floor-at-zero deduction. Nothing here caches a balance.

use parley_types::allowance::AllowanceEntry;
use parley_types::error::RepositoryError;

/// Repository trait for per-user allowance rows.
pub trait AllowanceRepository: Send + Sync {
    fn get_allowance(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<AllowanceEntry>, RepositoryError>> + Send;

    /// Atomically subtract `cost_cents` (> 0), clamping at zero.
    ///
    /// Returns the new remaining balance, or 0 when the user has no row.
    fn deduct_allowance(
        &self,
        user_id: &str,
        cost_cents: i64,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Create or reset the row so alloted and remaining both equal `cents`.
    fn set_allowance(
        &self,
        user_id: &str,
        cents: i64,
    ) -> impl std::future::Future<Output = Result<AllowanceEntry, RepositoryError>> + Send;
}

/// Read and deduct a user's remaining allowance.
#[derive(Clone)]
pub struct AllowanceLedger<A: AllowanceRepository> {
    repo: A,
}

impl<A: AllowanceRepository> AllowanceLedger<A> {
    pub fn new(repo: A) -> Self {
        Self { repo }
    }

    /// Remaining cents. A user without a row has nothing left.
    pub async fn get_remaining(&self, user_id: &str) -> Result<i64, RepositoryError> {
        Ok(self
            .repo
            .get_allowance(user_id)
            .await?
            .map(|entry| entry.remaining_allowance)
            .unwrap_or(0))
    }

    /// Deduct `cost_cents`, flooring at zero. Non-positive costs leave the
    /// balance untouched and return it.
    pub async fn deduct(&self, user_id: &str, cost_cents: i64) -> Result<i64, RepositoryError> {
        if cost_cents <= 0 {
            return self.get_remaining(user_id).await;
        }
        self.repo.deduct_allowance(user_id, cost_cents).await
    }

    pub async fn grant(&self, user_id: &str, cents: i64) -> Result<AllowanceEntry, RepositoryError> {
        if cents < 0 {
            return Err(RepositoryError::Query(
                "allowance must not be negative".to_string(),
            ));
        }
        self.repo.set_allowance(user_id, cents).await
    }

    pub async fn entry(&self, user_id: &str) -> Result<Option<AllowanceEntry>, RepositoryError> {
        self.repo.get_allowance(user_id).await
    }
}
