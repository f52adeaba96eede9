//! Rate request types and lifecycle for Ratekeeper.

use crate::{CurrencyCode, CurrencyPair, RateError, RateRequestId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rate request status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateStatus {
    /// Created, waiting to be claimed by a refresh cycle.
    Pending,
    /// Claimed by a refresh cycle, lookup in flight.
    Processing,
    /// Rate fetched and stored.
    Completed,
    /// Lookup failed or the provider had no quote for the pair.
    Failed,
}

impl RateStatus {
    /// Get the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateStatus::Pending => "PENDING",
            RateStatus::Processing => "PROCESSING",
            RateStatus::Completed => "COMPLETED",
            RateStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, RateStatus::Completed | RateStatus::Failed)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[RateStatus] {
        match self {
            RateStatus::Pending => &[RateStatus::Processing],
            RateStatus::Processing => &[RateStatus::Completed, RateStatus::Failed],
            RateStatus::Completed => &[],
            RateStatus::Failed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: RateStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for RateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateStatus {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, RateError> {
        match s {
            "PENDING" => Ok(RateStatus::Pending),
            "PROCESSING" => Ok(RateStatus::Processing),
            "COMPLETED" => Ok(RateStatus::Completed),
            "FAILED" => Ok(RateStatus::Failed),
            other => Err(RateError::InconsistentState(format!(
                "unknown rate status {other:?}"
            ))),
        }
    }
}

/// A request for the exchange rate of one currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRequest {
    /// Unique identifier, assigned at creation.
    pub id: RateRequestId,
    /// Caller-supplied deduplication token, unique across all requests.
    pub idempotency_key: String,
    /// Currency converted from.
    pub base_currency: CurrencyCode,
    /// Currency converted to.
    pub result_currency: CurrencyCode,
    /// Current status.
    pub status: RateStatus,
    /// Quoted rate, present only once completed.
    pub rate: Option<Decimal>,
    /// When the rate was stored, present only once completed.
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RateRequest {
    /// Create a new pending request for a pair.
    pub fn pending(pair: CurrencyPair, idempotency_key: impl Into<String>) -> Self {
        let now = crate::now();
        Self {
            id: RateRequestId::new(),
            idempotency_key: idempotency_key.into(),
            base_currency: pair.base,
            result_currency: pair.result,
            status: RateStatus::Pending,
            rate: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the currency pair of this request.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair {
            base: self.base_currency,
            result: self.result_currency,
        }
    }

    /// Transition to a new status, enforcing forward-only moves.
    pub fn transition_to(
        &mut self,
        new_status: RateStatus,
        at: Timestamp,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;
        self.updated_at = at;
        Ok(())
    }

    /// Store the quoted rate and mark completed.
    ///
    /// Unconditional: the caller owns the claim on this request.
    pub fn record_completion(&mut self, rate: Decimal, at: Timestamp) {
        self.status = RateStatus::Completed;
        self.rate = Some(rate);
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    /// Mark failed. Unconditional, like [`RateRequest::record_completion`].
    pub fn record_failure(&mut self, at: Timestamp) {
        self.status = RateStatus::Failed;
        self.updated_at = at;
    }

    /// Return a stuck `Processing` request to `Pending` so a later cycle
    /// picks it up again.
    pub fn requeue(&mut self, at: Timestamp) -> Result<(), InvalidTransition> {
        if self.status != RateStatus::Processing {
            return Err(InvalidTransition {
                from: self.status,
                to: RateStatus::Pending,
            });
        }

        self.status = RateStatus::Pending;
        self.updated_at = at;
        Ok(())
    }

    /// Check the `rate`/`completed_at` presence invariant.
    pub fn check_consistency(&self) -> Result<(), RateError> {
        let completed = self.status == RateStatus::Completed;
        if completed != self.rate.is_some() || completed != self.completed_at.is_some() {
            return Err(RateError::InconsistentState(format!(
                "rate request {} is {} with rate {:?} and completed_at {:?}",
                self.id, self.status, self.rate, self.completed_at
            )));
        }
        if self.base_currency == self.result_currency {
            return Err(RateError::InconsistentState(format!(
                "rate request {} has identical base and result currency {}",
                self.id, self.base_currency
            )));
        }
        Ok(())
    }
}

/// Error when attempting invalid state transition.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: RateStatus,
    pub to: RateStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid state transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}
