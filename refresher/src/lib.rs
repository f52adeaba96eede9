//! Ratekeeper Refresher
//!
//! Periodically claims pending rate requests, looks up one quote snapshot per
//! base currency and writes the outcome of every claimed request back to the
//! store. Also hosts [`CurrencyService`], the application service used by the
//! request-facing layer to read and create rate requests.

pub mod config;
pub mod grouper;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod state;

pub use config::{Environment, RefresherConfig, StoreBackend};
pub use grouper::{group_rates, BaseGroup, PairGroup};
pub use metrics::{RefreshMetrics, RefreshMetricsSnapshot, SharedMetrics};
pub use orchestrator::{CycleReport, RateRefresher};
pub use scheduler::RefreshScheduler;
pub use service::CurrencyService;
pub use state::CyclePhase;
