//! Frankfurter API gateway.

use async_trait::async_trait;
use ratekeeper_common::CurrencyCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::{RateGateway, RateSnapshot};

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    base: String,
    #[serde(default)]
    date: Option<String>,
    rates: HashMap<String, Decimal>,
}

/// Gateway backed by the Frankfurter `/v1/latest` endpoint.
pub struct FrankfurterGateway {
    client: reqwest::Client,
    base_url: String,
}

impl FrankfurterGateway {
    /// Create a gateway for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> FxResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FxError::Unavailable(e.to_string()))?;

        Ok(Self::with_client(base_url, client))
    }

    /// Create a gateway reusing an existing HTTP client.
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateGateway for FrankfurterGateway {
    fn name(&self) -> &str {
        "FRANKFURTER"
    }

    #[instrument(skip(self), fields(base = %base))]
    async fn fetch_rates(&self, base: CurrencyCode) -> FxResult<RateSnapshot> {
        let url = format!("{}/v1/latest", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("base", base.code())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Frankfurter responded with error status");
            return Err(FxError::UnexpectedStatus(status.as_u16()));
        }

        let body: LatestRatesResponse = response
            .json()
            .await
            .map_err(|e| FxError::Decode(e.to_string()))?;

        if body.base != base.code() {
            warn!(
                requested = %base,
                returned = %body.base,
                "Frankfurter returned a different base"
            );
        }

        debug!(
            date = body.date.as_deref().unwrap_or("unknown"),
            quotes = body.rates.len(),
            "Fetched rates from Frankfurter"
        );

        Ok(RateSnapshot::new(body.rates))
    }
}
