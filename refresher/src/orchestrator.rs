//! Refresh cycle orchestration.
//!
//! A cycle claims a batch of pending requests, groups them by currency pair
//! and runs one task per base currency. Each task makes a single provider
//! call and writes the outcome of every pair under its base. Tasks share
//! nothing but the store and the gateway, and a failing or panicking task
//! never affects its siblings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use ratekeeper_common::{CurrencyCode, RateRequestId};
use ratekeeper_fx::RateGateway;
use ratekeeper_store::RateStore;

use crate::grouper::{group_rates, BaseGroup};
use crate::metrics::{RefreshMetrics, SharedMetrics};
use crate::state::CyclePhase;

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// The claim step failed and nothing was dispatched.
    pub claim_failed: bool,
    /// Requests claimed.
    pub claimed: usize,
    /// Distinct base currencies, one provider call each.
    pub bases: usize,
    /// Requests marked completed.
    pub completed: usize,
    /// Requests marked failed, or whose write failed.
    pub failed: usize,
    /// Tasks or provider calls that panicked.
    pub panicked: usize,
}

impl CycleReport {
    fn absorb(&mut self, outcome: &GroupOutcome) {
        self.completed += outcome.completed;
        self.failed += outcome.failed;
        if outcome.panicked {
            self.panicked += 1;
        }
    }
}

/// Result of refreshing every pair under one base currency.
#[derive(Debug, Clone)]
struct GroupOutcome {
    base: CurrencyCode,
    completed: usize,
    failed: usize,
    panicked: bool,
    /// Provider error that failed the whole base.
    error: Option<String>,
}

impl GroupOutcome {
    fn new(base: CurrencyCode) -> Self {
        Self {
            base,
            completed: 0,
            failed: 0,
            panicked: false,
            error: None,
        }
    }
}

/// Runs refresh cycles against a store and a rate gateway.
pub struct RateRefresher {
    store: Arc<dyn RateStore>,
    gateway: Arc<dyn RateGateway>,
    metrics: SharedMetrics,
    cycle_seq: AtomicU64,
    /// Phase of the most recently started cycle, tagged with its sequence
    /// number. Older cycles still in flight never overwrite it.
    phase: RwLock<(u64, CyclePhase)>,
}

impl RateRefresher {
    /// Create a refresher with fresh metrics.
    pub fn new(store: Arc<dyn RateStore>, gateway: Arc<dyn RateGateway>) -> Self {
        Self::with_metrics(store, gateway, Arc::new(RefreshMetrics::new()))
    }

    /// Create a refresher reporting into shared metrics.
    pub fn with_metrics(
        store: Arc<dyn RateStore>,
        gateway: Arc<dyn RateGateway>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            gateway,
            metrics,
            cycle_seq: AtomicU64::new(0),
            phase: RwLock::new((0, CyclePhase::Idle)),
        }
    }

    /// Get the phase of the most recently started cycle.
    pub fn phase(&self) -> CyclePhase {
        self.phase.read().1
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn RateStore> {
        &self.store
    }

    /// Record the start of a cycle and return its sequence number.
    fn start_cycle(&self) -> u64 {
        let seq = self.cycle_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.set_phase(seq, CyclePhase::Idle.next());
        seq
    }

    /// Move cycle `seq` to the next phase of a successful cycle.
    fn advance(&self, seq: u64) {
        let mut current = self.phase.write();
        if current.0 == seq {
            current.1 = current.1.next();
            debug!(cycle = seq, phase = %current.1, "Refresh cycle phase changed");
        }
    }

    fn set_phase(&self, seq: u64, phase: CyclePhase) {
        let mut current = self.phase.write();
        // A newer cycle owns the phase.
        if seq < current.0 {
            return;
        }
        *current = (seq, phase);
        debug!(cycle = seq, phase = %phase, "Refresh cycle phase changed");
    }

    /// Run one refresh cycle over at most `batch_size` pending requests.
    ///
    /// Never fails: a claim error abandons the cycle, and every other error
    /// is confined to the requests it concerns. Returns once every
    /// dispatched task has finished.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, batch_size: usize) -> CycleReport {
        self.metrics.cycle_started();
        let seq = self.start_cycle();

        let claimed = match self.store.claim(batch_size).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to claim pending rate requests"
                );
                self.metrics.claim_error();
                self.set_phase(seq, CyclePhase::Idle);
                return CycleReport {
                    claim_failed: true,
                    ..CycleReport::default()
                };
            }
        };

        if claimed.is_empty() {
            debug!("No pending rate requests");
            self.metrics.cycle_empty();
            self.set_phase(seq, CyclePhase::Idle);
            return CycleReport::default();
        }

        self.metrics.claimed(claimed.len());
        self.advance(seq);

        let groups = group_rates(&claimed);
        let mut report = CycleReport {
            claimed: claimed.len(),
            bases: groups.len(),
            ..CycleReport::default()
        };

        let mut tasks = JoinSet::new();
        for group in groups {
            tasks.spawn(refresh_base(
                Arc::clone(&self.store),
                Arc::clone(&self.gateway),
                group,
            ));
        }

        self.advance(seq);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.panicked {
                        self.metrics.task_panicked();
                    } else if outcome.error.is_some() {
                        self.metrics.gateway_error();
                    }
                    debug!(
                        base = %outcome.base,
                        completed = outcome.completed,
                        failed = outcome.failed,
                        "Base currency refreshed"
                    );
                    report.absorb(&outcome);
                }
                Err(e) if e.is_panic() => {
                    error!(error = %e, "Rate refresh task panicked");
                    self.metrics.task_panicked();
                    report.panicked += 1;
                }
                Err(e) => {
                    error!(error = %e, "Rate refresh task was cancelled");
                }
            }
        }

        self.metrics.completed(report.completed);
        self.metrics.failed(report.failed);

        info!(
            claimed = report.claimed,
            bases = report.bases,
            completed = report.completed,
            failed = report.failed,
            panicked = report.panicked,
            "Refresh cycle finished"
        );

        self.advance(seq);
        report
    }
}

/// Refresh every pair under one base currency with a single provider call.
async fn refresh_base(
    store: Arc<dyn RateStore>,
    gateway: Arc<dyn RateGateway>,
    group: BaseGroup,
) -> GroupOutcome {
    let base = group.base;
    let mut outcome = GroupOutcome::new(base);

    // The provider call runs in its own task so a panic inside it surfaces
    // here, before any write, and the base can still be failed.
    let lookup = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.fetch_rates(base).await }).await
    };

    let snapshot = match lookup {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(e)) => {
            warn!(
                base = %base,
                gateway = gateway.name(),
                error = %e,
                requests = group.len(),
                "Rate lookup failed, failing every request for base"
            );
            outcome.error = Some(e.to_string());
            fail_ids(store.as_ref(), base, &group.all_ids(), &mut outcome).await;
            return outcome;
        }
        Err(e) => {
            error!(
                base = %base,
                gateway = gateway.name(),
                error = %e,
                "Rate lookup panicked, failing every request for base"
            );
            outcome.panicked = e.is_panic();
            outcome.error = Some(e.to_string());
            fail_ids(store.as_ref(), base, &group.all_ids(), &mut outcome).await;
            return outcome;
        }
    };

    for pair in &group.pairs {
        let Some(rate) = snapshot.quote(pair.result) else {
            warn!(
                base = %base,
                result = %pair.result,
                requests = pair.ids.len(),
                "No quote returned for pair"
            );
            fail_ids(store.as_ref(), base, &pair.ids, &mut outcome).await;
            continue;
        };

        match store.complete(&pair.ids, rate).await {
            Ok(()) => outcome.completed += pair.ids.len(),
            Err(e) => {
                error!(
                    base = %base,
                    result = %pair.result,
                    error = %e,
                    "Failed to store completed rate"
                );
                outcome.failed += pair.ids.len();
            }
        }
    }

    outcome
}

async fn fail_ids(
    store: &dyn RateStore,
    base: CurrencyCode,
    ids: &[RateRequestId],
    outcome: &mut GroupOutcome,
) {
    if let Err(e) = store.fail(ids).await {
        error!(
            base = %base,
            error = %e,
            requests = ids.len(),
            "Failed to mark rate requests failed"
        );
    }
    outcome.failed += ids.len();
}
