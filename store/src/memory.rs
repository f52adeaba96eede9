//! In-memory rate store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use ratekeeper_common::{CurrencyPair, RateError, RateRequest, RateRequestId, RateStatus, Result};

use crate::RateStore;

#[derive(Default)]
struct Table {
    rows: HashMap<RateRequestId, RateRequest>,
    by_key: HashMap<String, RateRequestId>,
}

/// Rate store kept in process memory.
///
/// Every operation runs inside one short critical section, so a claim is
/// atomic with respect to other claims and never waits on I/O.
pub struct MemoryRateStore {
    table: Mutex<Table>,
}

impl MemoryRateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table::default()),
        }
    }

    /// Insert a request as-is. Used to seed fixtures with chosen timestamps
    /// or states.
    pub fn insert(&self, request: RateRequest) -> Result<()> {
        let mut table = self.table.lock();
        if table.by_key.contains_key(&request.idempotency_key) {
            return Err(RateError::IdempotencyConflict(request.idempotency_key));
        }
        table
            .by_key
            .insert(request.idempotency_key.clone(), request.id);
        table.rows.insert(request.id, request);
        Ok(())
    }

    /// All stored requests, oldest first.
    pub fn records(&self) -> Vec<RateRequest> {
        let table = self.table.lock();
        let mut records: Vec<RateRequest> = table.rows.values().cloned().collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Number of requests currently in `status`.
    pub fn count_with_status(&self, status: RateStatus) -> usize {
        self.table
            .lock()
            .rows
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.table.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().rows.is_empty()
    }

    fn update_each(&self, ids: &[RateRequestId], mut apply: impl FnMut(&mut RateRequest)) {
        let mut table = self.table.lock();
        for id in ids {
            match table.rows.get_mut(id) {
                Some(request) => apply(request),
                None => warn!(id = %id, "Update skipped, rate request not found"),
            }
        }
    }
}

impl Default for MemoryRateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn claim(&self, limit: usize) -> Result<Vec<RateRequest>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = ratekeeper_common::now();
        let mut table = self.table.lock();

        let mut pending: Vec<(ratekeeper_common::Timestamp, RateRequestId)> = table
            .rows
            .values()
            .filter(|r| r.status == RateStatus::Pending)
            .map(|r| (r.created_at, r.id))
            .collect();
        pending.sort();
        pending.truncate(limit);

        let mut claimed = Vec::with_capacity(pending.len());
        for (_, id) in pending {
            if let Some(request) = table.rows.get_mut(&id) {
                request
                    .transition_to(RateStatus::Processing, now)
                    .map_err(|e| RateError::InconsistentState(e.to_string()))?;
                claimed.push(request.clone());
            }
        }

        debug!(claimed = claimed.len(), limit, "Claimed pending rate requests");
        Ok(claimed)
    }

    async fn complete(&self, ids: &[RateRequestId], rate: Decimal) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = ratekeeper_common::now();
        self.update_each(ids, |request| request.record_completion(rate, now));
        Ok(())
    }

    async fn fail(&self, ids: &[RateRequestId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = ratekeeper_common::now();
        self.update_each(ids, |request| request.record_failure(now));
        Ok(())
    }

    async fn get_latest_completed(&self, pair: CurrencyPair) -> Result<RateRequest> {
        let table = self.table.lock();
        table
            .rows
            .values()
            .filter(|r| r.status == RateStatus::Completed && r.pair() == pair)
            .max_by_key(|r| r.completed_at)
            .cloned()
            .ok_or_else(|| RateError::NotFound(pair.to_string()))
    }

    async fn get_by_id(&self, id: RateRequestId) -> Result<RateRequest> {
        self.table
            .lock()
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| RateError::NotFound(id.to_string()))
    }

    async fn create_if_absent(
        &self,
        pair: CurrencyPair,
        idempotency_key: &str,
    ) -> Result<RateRequest> {
        let mut table = self.table.lock();

        if let Some(existing_id) = table.by_key.get(idempotency_key).copied() {
            let existing = table.rows.get(&existing_id).cloned().ok_or_else(|| {
                RateError::InconsistentState(format!(
                    "idempotency key {idempotency_key} points at missing request {existing_id}"
                ))
            })?;

            if existing.pair() != pair {
                return Err(RateError::IdempotencyConflict(idempotency_key.to_string()));
            }
            debug!(id = %existing.id, key = idempotency_key, "Idempotent replay");
            return Ok(existing);
        }

        let request = RateRequest::pending(pair, idempotency_key);
        table
            .by_key
            .insert(idempotency_key.to_string(), request.id);
        table.rows.insert(request.id, request.clone());

        info!(id = %request.id, pair = %pair, "Rate request created");
        Ok(request)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = ratekeeper_common::ago(older_than);
        let now = ratekeeper_common::now();
        let mut table = self.table.lock();

        let mut requeued = 0;
        for request in table.rows.values_mut() {
            if request.status == RateStatus::Processing && request.updated_at < cutoff {
                request
                    .requeue(now)
                    .map_err(|e| RateError::InconsistentState(e.to_string()))?;
                requeued += 1;
            }
        }

        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;
    use ratekeeper_common::CurrencyCode;
    use rust_decimal_macros::dec;

    fn pair(base: CurrencyCode, result: CurrencyCode) -> CurrencyPair {
        CurrencyPair::new(base, result).unwrap()
    }

    fn usd_eur() -> CurrencyPair {
        pair(CurrencyCode::Usd, CurrencyCode::Eur)
    }

    /// Seed `count` pending requests with strictly increasing creation times.
    fn seeded(count: usize) -> (MemoryRateStore, Vec<RateRequestId>) {
        let store = MemoryRateStore::new();
        let start = ratekeeper_common::now() - chrono::Duration::hours(1);
        let mut ids = Vec::new();
        for i in 0..count {
            let mut request = RateRequest::pending(usd_eur(), format!("key-{i}"));
            request.created_at = start + chrono::Duration::seconds(i as i64);
            request.updated_at = request.created_at;
            ids.push(request.id);
            store.insert(request).unwrap();
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_claim_oldest_first_up_to_limit() {
        let (store, ids) = seeded(5);

        let claimed = store.claim(3).await.unwrap();

        let claimed_ids: Vec<_> = claimed.iter().map(|r| r.id).collect();
        assert_eq!(claimed_ids, ids[..3].to_vec());
        assert!(claimed.iter().all(|r| r.status == RateStatus::Processing));
        assert_eq!(store.count_with_status(RateStatus::Pending), 2);
    }

    #[tokio::test]
    async fn test_claim_returns_all_when_fewer_than_limit() {
        let (store, _) = seeded(2);

        assert_eq!(store.claim(10).await.unwrap().len(), 2);
        assert!(store.claim(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_on_empty_store() {
        let store = MemoryRateStore::new();
        assert!(store.claim(10).await.unwrap().is_empty());
        assert!(store.claim(0).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_disjoint() {
        let (store, ids) = seeded(200);
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.claim(7).await.unwrap() }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for request in handle.await.unwrap() {
                assert!(seen.insert(request.id), "request {} claimed twice", request.id);
                total += 1;
            }
        }

        assert_eq!(total, 16 * 7);
        assert!(seen.iter().all(|id| ids.contains(id)));
    }

    #[tokio::test]
    async fn test_complete_and_fail() {
        let (store, ids) = seeded(3);
        store.claim(3).await.unwrap();

        store.complete(&ids[..2], dec!(0.85)).await.unwrap();
        store.fail(&ids[2..]).await.unwrap();

        let done = store.get_by_id(ids[0]).await.unwrap();
        assert_eq!(done.status, RateStatus::Completed);
        assert_eq!(done.rate, Some(dec!(0.85)));
        assert!(done.completed_at.is_some());

        let failed = store.get_by_id(ids[2]).await.unwrap();
        assert_eq!(failed.status, RateStatus::Failed);
        assert!(failed.rate.is_none());
    }

    #[tokio::test]
    async fn test_empty_id_set_is_noop() {
        let (store, _) = seeded(1);
        let before = store.records();

        store.complete(&[], dec!(1)).await.unwrap();
        store.fail(&[]).await.unwrap();

        assert_eq!(store.records(), before);
    }

    #[tokio::test]
    async fn test_get_latest_completed() {
        let store = MemoryRateStore::new();
        let first = store.create_if_absent(usd_eur(), "a").await.unwrap();
        let second = store.create_if_absent(usd_eur(), "b").await.unwrap();
        store.claim(10).await.unwrap();

        store.complete(&[first.id], dec!(0.80)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.complete(&[second.id], dec!(0.90)).await.unwrap();

        let latest = store.get_latest_completed(usd_eur()).await.unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.rate, Some(dec!(0.90)));

        let missing = store
            .get_latest_completed(pair(CurrencyCode::Eur, CurrencyCode::Mxn))
            .await;
        assert!(matches!(missing, Err(RateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let store = MemoryRateStore::new();
        let result = store.get_by_id(RateRequestId::new()).await;
        assert!(matches!(result, Err(RateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_if_absent_replay_and_conflict() {
        let store = MemoryRateStore::new();

        let created = store.create_if_absent(usd_eur(), "k1").await.unwrap();
        let replayed = store.create_if_absent(usd_eur(), "k1").await.unwrap();
        assert_eq!(created.id, replayed.id);
        assert_eq!(store.len(), 1);

        let conflict = store
            .create_if_absent(pair(CurrencyCode::Usd, CurrencyCode::Mxn), "k1")
            .await;
        assert!(matches!(conflict, Err(RateError::IdempotencyConflict(key)) if key == "k1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_if_absent_yields_one_record() {
        let store = Arc::new(MemoryRateStore::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_if_absent(usd_eur(), "k1").await.unwrap().id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_stale_processing() {
        let (store, ids) = seeded(2);
        store.claim(2).await.unwrap();

        // Nothing is older than an hour yet
        assert_eq!(store.requeue_stale(Duration::from_secs(3600)).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.requeue_stale(Duration::from_millis(1)).await.unwrap(), 2);

        let request = store.get_by_id(ids[0]).await.unwrap();
        assert_eq!(request.status, RateStatus::Pending);
        assert_eq!(store.claim(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_requeue_leaves_final_states_alone() {
        let (store, ids) = seeded(2);
        store.claim(2).await.unwrap();
        store.complete(&ids[..1], dec!(1.5)).await.unwrap();
        store.fail(&ids[1..]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.requeue_stale(Duration::from_millis(1)).await.unwrap(), 0);
    }

    proptest! {
        #[test]
        fn prop_sequential_claims_partition_pending(
            count in 0usize..40,
            limits in proptest::collection::vec(1usize..10, 1..12),
        ) {
            let (store, ids) = seeded(count);
            let mut claimed = Vec::new();

            for limit in limits {
                let batch = tokio_test::block_on(store.claim(limit)).unwrap();
                prop_assert!(batch.len() <= limit);
                claimed.extend(batch.into_iter().map(|r| r.id));
            }

            // Claims never overlap and follow creation order
            let expected: Vec<_> = ids.iter().take(claimed.len()).copied().collect();
            prop_assert_eq!(claimed, expected);
        }
    }
}
