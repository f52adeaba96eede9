//! Error types for Ratekeeper.

use crate::{CurrencyCode, RateRequestId};
use thiserror::Error;

/// Broad category of an error, used by callers to pick a response class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent malformed input.
    BadRequest,
    /// The requested record does not exist.
    NotFound,
    /// The request is well formed but violates a business rule.
    BusinessLogic,
    /// Infrastructure failure or broken invariant.
    Internal,
}

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RateError {
    /// Currency code outside the supported set.
    #[error("Invalid currency code: {0}")]
    InvalidCurrencyCode(String),

    /// Base and result currency are the same.
    #[error("Base and result currencies should differ, both are {0}")]
    CurrenciesShouldDiffer(CurrencyCode),

    /// Rate request id was empty.
    #[error("Rate request id is required")]
    RateRequestIdRequired,

    /// Idempotency key was empty.
    #[error("Idempotency key is required")]
    InvalidIdempotencyKey,

    /// Rate request not found.
    #[error("Currency rate not found: {0}")]
    NotFound(String),

    /// Rate request exists but has not been processed yet.
    #[error("Currency rate {0} is not completed yet")]
    NotCompletedYet(RateRequestId),

    /// Provider lookup for the rate request failed.
    #[error("Currency rate {0} could not be fetched")]
    FetchFailed(RateRequestId),

    /// Idempotency key reused for a different currency pair.
    #[error("Idempotency key {0} was already used for a different currency pair")]
    IdempotencyConflict(String),

    /// Stored data violates an invariant.
    #[error("Inconsistent entity state: {0}")]
    InconsistentState(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Rate provider error.
    #[error("Rate gateway error: {0}")]
    Gateway(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RateError {
    /// Check if this error is transient infrastructure trouble that the next
    /// refresh cycle may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RateError::Database(_) | RateError::Gateway(_))
    }

    /// Get the response class for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RateError::RateRequestIdRequired | RateError::InvalidIdempotencyKey => {
                ErrorKind::BadRequest
            }
            RateError::NotFound(_) => ErrorKind::NotFound,
            RateError::InvalidCurrencyCode(_)
            | RateError::CurrenciesShouldDiffer(_)
            | RateError::NotCompletedYet(_)
            | RateError::FetchFailed(_)
            | RateError::IdempotencyConflict(_) => ErrorKind::BusinessLogic,
            RateError::InconsistentState(_)
            | RateError::Database(_)
            | RateError::Gateway(_)
            | RateError::Configuration(_) => ErrorKind::Internal,
        }
    }

    /// Get the stable error code reported to API clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateError::InvalidCurrencyCode(_) => "InvalidCurrencyCode",
            RateError::CurrenciesShouldDiffer(_) => "CurrenciesShouldDiffer",
            RateError::RateRequestIdRequired => "CurrencyRateIdIsRequired",
            RateError::InvalidIdempotencyKey => "IdempotencyKeyIsRequired",
            RateError::NotFound(_) => "CurrencyRateNotFound",
            RateError::NotCompletedYet(_) => "CurrencyRateNotCompletedYet",
            RateError::FetchFailed(_) => "CurrencyRateFetchFailed",
            RateError::IdempotencyConflict(_) => "CurrencyRateIdempotencyConflict",
            RateError::InconsistentState(_) => "InternalServerError",
            RateError::Database(_) => "InternalServerError",
            RateError::Gateway(_) => "InternalServerError",
            RateError::Configuration(_) => "InternalServerError",
        }
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(RateError::Database("connection reset".into()).is_retryable());
        assert!(RateError::Gateway("timeout".into()).is_retryable());
        assert!(!RateError::IdempotencyConflict("k1".into()).is_retryable());
        assert!(!RateError::InconsistentState("bad status".into()).is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        let id = RateRequestId::new();
        assert_eq!(RateError::NotCompletedYet(id).kind(), ErrorKind::BusinessLogic);
        assert_eq!(RateError::FetchFailed(id).kind(), ErrorKind::BusinessLogic);
        assert_eq!(RateError::NotFound(id.to_string()).kind(), ErrorKind::NotFound);
        assert_eq!(RateError::RateRequestIdRequired.kind(), ErrorKind::BadRequest);
        assert_eq!(
            RateError::InconsistentState("x".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RateError::IdempotencyConflict("k1".into()).error_code(),
            "CurrencyRateIdempotencyConflict"
        );
        assert_eq!(
            RateError::NotCompletedYet(RateRequestId::new()).error_code(),
            "CurrencyRateNotCompletedYet"
        );
    }
}
