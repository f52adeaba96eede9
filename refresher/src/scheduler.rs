//! Periodic refresh trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ratekeeper_store::RateStore;

use crate::orchestrator::RateRefresher;

/// Starts a refresh cycle on every tick until shut down.
///
/// Each cycle runs in its own task, so a cycle that overruns the interval
/// does not hold back the next tick. Overlapping cycles are safe because the
/// store never hands the same request to two claims.
///
/// Stale recovery only runs on ticks where no cycle of this scheduler is in
/// flight, so it never requeues a request a local cycle still holds.
pub struct RefreshScheduler {
    refresher: Arc<RateRefresher>,
    interval: Duration,
    batch_size: usize,
    stale_after: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
}

impl RefreshScheduler {
    /// Create a scheduler. Stale processing recovery is off.
    pub fn new(refresher: Arc<RateRefresher>, interval: Duration, batch_size: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            refresher,
            interval,
            batch_size,
            stale_after: None,
            shutdown_tx,
        }
    }

    /// Requeue requests stuck in processing for longer than `timeout`
    /// before a cycle, when no earlier cycle is still running.
    pub fn with_stale_recovery(mut self, timeout: Duration) -> Self {
        self.stale_after = Some(timeout);
        self
    }

    /// Stop starting new cycles. [`RefreshScheduler::run`] returns once the
    /// cycles already in flight finish.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Check if shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Tick until shutdown, then drain in-flight cycles.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();

        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            stale_recovery = self.stale_after.is_some(),
            "Refresh scheduler started"
        );

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let refresher = Arc::clone(&self.refresher);
                    let batch_size = self.batch_size;
                    let stale_after = self.stale_after.filter(|_| cycles.is_empty());
                    if self.stale_after.is_some() && stale_after.is_none() {
                        debug!(in_flight = cycles.len(), "Skipping stale recovery");
                    }
                    cycles.spawn(async move {
                        if let Some(timeout) = stale_after {
                            requeue_stale(&refresher, timeout).await;
                        }
                        refresher.run_cycle(batch_size).await;
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                // Reap finished cycles so the set does not grow unbounded.
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    log_join(joined);
                }
            }
        }

        info!(in_flight = cycles.len(), "Refresh scheduler stopping, draining cycles");
        while let Some(joined) = cycles.join_next().await {
            log_join(joined);
        }
        info!("Refresh scheduler stopped");
    }
}

async fn requeue_stale(refresher: &RateRefresher, timeout: Duration) {
    match refresher.store().requeue_stale(timeout).await {
        Ok(0) => {}
        Ok(count) => {
            warn!(
                count,
                timeout_secs = timeout.as_secs(),
                "Requeued stale processing rate requests"
            );
            refresher.metrics().requeued(count);
        }
        Err(e) => error!(error = %e, "Failed to requeue stale rate requests"),
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    match joined {
        Ok(()) => debug!("Refresh cycle task finished"),
        Err(e) => error!(error = %e, "Refresh cycle task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratekeeper_common::{CurrencyCode, CurrencyPair, RateStatus};
    use ratekeeper_fx::StaticRateGateway;
    use ratekeeper_store::MemoryRateStore;
    use rust_decimal_macros::dec;

    fn setup(gateway: StaticRateGateway) -> (Arc<MemoryRateStore>, Arc<RateRefresher>) {
        let store = Arc::new(MemoryRateStore::new());
        let refresher = Arc::new(RateRefresher::new(store.clone(), Arc::new(gateway)));
        (store, refresher)
    }

    fn usd_eur() -> CurrencyPair {
        CurrencyPair::new(CurrencyCode::Usd, CurrencyCode::Eur).unwrap()
    }

    #[tokio::test]
    async fn test_scheduler_refreshes_until_shutdown() {
        let gateway = StaticRateGateway::new();
        gateway.set_rates(CurrencyCode::Usd, [(CurrencyCode::Eur, dec!(0.85))]);
        let (store, refresher) = setup(gateway);
        let created = store.create_if_absent(usd_eur(), "k1").await.unwrap();

        let scheduler = Arc::new(RefreshScheduler::new(
            refresher.clone(),
            Duration::from_millis(10),
            10,
        ));
        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown();
        running.await.unwrap();

        assert!(scheduler.is_shutting_down());
        let stored = store.get_by_id(created.id).await.unwrap();
        assert_eq!(stored.status, RateStatus::Completed);
        assert!(refresher.metrics().snapshot().cycles_total >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_cycle() {
        let gateway = StaticRateGateway::new().with_delay(Duration::from_millis(100));
        gateway.set_rates(CurrencyCode::Usd, [(CurrencyCode::Eur, dec!(0.85))]);
        let (store, refresher) = setup(gateway);
        let created = store.create_if_absent(usd_eur(), "k1").await.unwrap();

        let scheduler = Arc::new(RefreshScheduler::new(refresher, Duration::from_secs(60), 10));
        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        // The first tick fires immediately; shut down while its lookup is slow.
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.shutdown();
        running.await.unwrap();

        let stored = store.get_by_id(created.id).await.unwrap();
        assert_eq!(stored.status, RateStatus::Completed);
    }

    #[tokio::test]
    async fn test_stale_recovery_requeues_before_cycle() {
        let gateway = StaticRateGateway::new();
        gateway.set_rates(CurrencyCode::Usd, [(CurrencyCode::Eur, dec!(0.85))]);
        let (store, refresher) = setup(gateway);
        let created = store.create_if_absent(usd_eur(), "k1").await.unwrap();

        // Simulate a crashed cycle that claimed the request and never wrote back.
        store.claim(10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let scheduler = Arc::new(
            RefreshScheduler::new(refresher.clone(), Duration::from_secs(60), 10)
                .with_stale_recovery(Duration::from_millis(5)),
        );
        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();
        running.await.unwrap();

        let stored = store.get_by_id(created.id).await.unwrap();
        assert_eq!(stored.status, RateStatus::Completed);
        assert_eq!(refresher.metrics().snapshot().requeued_stale, 1);
    }

    #[tokio::test]
    async fn test_stale_recovery_skips_while_cycle_in_flight() {
        // Lookups outlast both the interval and the stale timeout.
        let gateway = StaticRateGateway::new().with_delay(Duration::from_millis(150));
        gateway.set_rates(CurrencyCode::Usd, [(CurrencyCode::Eur, dec!(0.85))]);
        let gateway = Arc::new(gateway);
        let store = Arc::new(MemoryRateStore::new());
        let refresher = Arc::new(RateRefresher::new(store.clone(), gateway.clone()));
        let created = store.create_if_absent(usd_eur(), "k1").await.unwrap();

        let scheduler = Arc::new(
            RefreshScheduler::new(refresher.clone(), Duration::from_millis(40), 10)
                .with_stale_recovery(Duration::from_millis(20)),
        );
        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.shutdown();
        running.await.unwrap();

        let metrics = refresher.metrics().snapshot();
        assert_eq!(metrics.records_claimed, 1);
        assert_eq!(metrics.requeued_stale, 0);
        assert_eq!(gateway.calls_for(CurrencyCode::Usd), 1);
        let stored = store.get_by_id(created.id).await.unwrap();
        assert_eq!(stored.status, RateStatus::Completed);
    }

    #[tokio::test]
    async fn test_stuck_requests_stay_processing_without_recovery() {
        let (store, refresher) = setup(StaticRateGateway::new());
        let created = store.create_if_absent(usd_eur(), "k1").await.unwrap();
        store.claim(10).await.unwrap();

        let scheduler = Arc::new(RefreshScheduler::new(refresher, Duration::from_millis(10), 10));
        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.shutdown();
        running.await.unwrap();

        let stored = store.get_by_id(created.id).await.unwrap();
        assert_eq!(stored.status, RateStatus::Processing);
    }
}
