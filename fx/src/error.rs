//! FX gateway error types.

use ratekeeper_common::{CurrencyCode, RateError};
use thiserror::Error;

/// Errors that can occur while fetching rates from a provider.
#[derive(Debug, Error)]
pub enum FxError {
    /// Request could not be sent or the connection failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider answered with a non-success status.
    #[error("Provider responded with status {0}")]
    UnexpectedStatus(u16),

    /// Provider body could not be decoded.
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    /// Provider does not quote against this base currency.
    #[error("Base currency {0} not supported by provider")]
    UnsupportedBase(CurrencyCode),

    /// Provider could not be reached or configured.
    #[error("Rate provider unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for FxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FxError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FxError::UnexpectedStatus(status.as_u16())
        } else {
            FxError::Transport(e.to_string())
        }
    }
}

impl From<FxError> for RateError {
    fn from(e: FxError) -> Self {
        RateError::Gateway(e.to_string())
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
