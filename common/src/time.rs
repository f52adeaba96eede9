//! Time utilities and constants for Ratekeeper.

use chrono::{DateTime, Utc};

/// Refresh timing defaults and limits.
pub mod defaults {
    use std::time::Duration;

    /// Default interval between refresh cycles.
    pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

    /// Smallest allowed refresh interval, in seconds.
    pub const MIN_REFRESH_INTERVAL_SECS: u64 = 1;

    /// Largest allowed refresh interval, in seconds.
    pub const MAX_REFRESH_INTERVAL_SECS: u64 = 60_000;

    /// Default number of pending requests claimed per cycle.
    pub const BATCH_SIZE: usize = 50;

    /// Smallest allowed batch size.
    pub const MIN_BATCH_SIZE: usize = 1;

    /// Largest allowed batch size.
    pub const MAX_BATCH_SIZE: usize = 100;

    /// Default timeout for outbound HTTP calls.
    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

    /// Slack a stale processing timeout must leave beyond the HTTP timeout,
    /// covering the store writes that follow a lookup.
    pub const STALE_PROCESSING_MARGIN: Duration = Duration::from_secs(30);
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Timestamp `age` before now, saturating at the minimum representable time.
pub fn ago(age: std::time::Duration) -> Timestamp {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
