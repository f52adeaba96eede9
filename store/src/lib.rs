//! Ratekeeper Rate Store
//!
//! Durable table of rate requests with claim-based reads and conditional
//! writes. Overlapping refresh cycles stay safe because [`RateStore::claim`]
//! never hands the same pending request to two callers, and idempotent
//! creation relies on the uniqueness of the idempotency key rather than on a
//! read-before-write check.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRateStore;
pub use postgres::PgRateStore;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use ratekeeper_common::{CurrencyPair, RateRequest, RateRequestId, Result};

/// Storage boundary consumed by the refresher and the currency service.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Atomically move up to `limit` of the oldest `Pending` requests to
    /// `Processing` and return them, oldest first.
    ///
    /// Concurrent callers never receive overlapping sets. Rows held by
    /// another in-flight claim are skipped, not waited on.
    async fn claim(&self, limit: usize) -> Result<Vec<RateRequest>>;

    /// Mark the given requests `Completed` with `rate`.
    async fn complete(&self, ids: &[RateRequestId], rate: Decimal) -> Result<()>;

    /// Mark the given requests `Failed`.
    async fn fail(&self, ids: &[RateRequestId]) -> Result<()>;

    /// Most recently completed request for the pair.
    async fn get_latest_completed(&self, pair: CurrencyPair) -> Result<RateRequest>;

    async fn get_by_id(&self, id: RateRequestId) -> Result<RateRequest>;

    /// Insert a `Pending` request unless the key already exists.
    ///
    /// Replays with the same pair return the stored request; reuse of the key
    /// for another pair fails with `IdempotencyConflict`.
    async fn create_if_absent(
        &self,
        pair: CurrencyPair,
        idempotency_key: &str,
    ) -> Result<RateRequest>;

    /// Return `Processing` requests untouched for longer than `older_than`
    /// to `Pending`. Returns how many were requeued.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64>;
}
