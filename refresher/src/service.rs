//! Currency rate application service.
//!
//! Entry points for the request-facing layer: read the latest rate of a
//! pair, read one request once it has completed, and create requests
//! idempotently.

use std::sync::Arc;

use tracing::instrument;

use ratekeeper_common::{
    validate_currency_pair, RateError, RateRequest, RateRequestId, RateStatus, Result,
};
use ratekeeper_store::RateStore;

/// Reads and creates rate requests on behalf of API callers.
#[derive(Clone)]
pub struct CurrencyService {
    store: Arc<dyn RateStore>,
}

impl CurrencyService {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// Most recently completed rate for a pair of currency codes.
    pub async fn get_actual_rate(&self, base: &str, result: &str) -> Result<RateRequest> {
        let pair = validate_currency_pair(base, result)?;
        self.store.get_latest_completed(pair).await
    }

    /// Get a request by id, only once it carries a rate.
    ///
    /// Requests still waiting for a cycle yield `NotCompletedYet`, failed ones
    /// yield `FetchFailed`. A malformed id cannot exist and yields `NotFound`.
    #[instrument(skip(self))]
    pub async fn get_completed_rate_by_id(&self, id: &str) -> Result<RateRequest> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RateError::RateRequestIdRequired);
        }
        let id = RateRequestId::parse(id).map_err(|_| RateError::NotFound(id.to_string()))?;

        let request = self.store.get_by_id(id).await?;
        match (request.status, request.rate) {
            (RateStatus::Completed, Some(_)) => Ok(request),
            (RateStatus::Pending | RateStatus::Processing, _) => {
                Err(RateError::NotCompletedYet(request.id))
            }
            (RateStatus::Failed, _) => Err(RateError::FetchFailed(request.id)),
            (RateStatus::Completed, None) => Err(RateError::InconsistentState(format!(
                "rate request {} is completed without a rate",
                request.id
            ))),
        }
    }

    /// Create a pending request, or return the one already stored under
    /// `idempotency_key` for the same pair.
    #[instrument(skip(self))]
    pub async fn create_rate(
        &self,
        base: &str,
        result: &str,
        idempotency_key: &str,
    ) -> Result<RateRequest> {
        let pair = validate_currency_pair(base, result)?;
        if idempotency_key.trim().is_empty() {
            return Err(RateError::InvalidIdempotencyKey);
        }
        self.store.create_if_absent(pair, idempotency_key).await
    }
}
