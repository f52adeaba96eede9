//! Refresh cycle state definitions.

use std::fmt;

/// Phase of the latest refresh cycle started on a [`RateRefresher`].
///
/// [`RateRefresher`]: crate::RateRefresher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    /// No cycle in progress.
    #[default]
    Idle,
    /// Claiming pending requests from the store.
    Claiming,
    /// Lookups dispatched, one task per base currency.
    Dispatching,
    /// Waiting for every dispatched task and tallying outcomes.
    Reconciling,
}

impl CyclePhase {
    /// Get the next phase of a successful cycle.
    pub fn next(&self) -> CyclePhase {
        match self {
            CyclePhase::Idle => CyclePhase::Claiming,
            CyclePhase::Claiming => CyclePhase::Dispatching,
            CyclePhase::Dispatching => CyclePhase::Reconciling,
            CyclePhase::Reconciling => CyclePhase::Idle,
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Claiming => "claiming",
            CyclePhase::Dispatching => "dispatching",
            CyclePhase::Reconciling => "reconciling",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cycle_returns_to_idle() {
        let mut phase = CyclePhase::default();
        let mut visited = vec![phase];
        for _ in 0..4 {
            phase = phase.next();
            visited.push(phase);
        }

        assert_eq!(
            visited,
            vec![
                CyclePhase::Idle,
                CyclePhase::Claiming,
                CyclePhase::Dispatching,
                CyclePhase::Reconciling,
                CyclePhase::Idle,
            ]
        );
        assert_eq!(CyclePhase::Dispatching.to_string(), "dispatching");
    }
}
