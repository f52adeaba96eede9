//! Rate gateway trait and in-process implementations.

use async_trait::async_trait;
use ratekeeper_common::CurrencyCode;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{FxError, FxResult};
use crate::frankfurter::FrankfurterGateway;

/// Quotes returned by one provider call, keyed by result currency code.
///
/// A missing key means the provider has no quote for that pair; it is not
/// an error. Keys outside the supported currency set are kept but never
/// looked up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateSnapshot {
    rates: HashMap<String, Decimal>,
}

impl RateSnapshot {
    /// Create a snapshot from raw provider quotes.
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        Self { rates }
    }

    /// Get the quote for a result currency.
    pub fn quote(&self, result: CurrencyCode) -> Option<Decimal> {
        self.rates.get(result.code()).copied()
    }

    /// Number of quotes in the snapshot.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Check if the provider returned no quotes at all.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl FromIterator<(CurrencyCode, Decimal)> for RateSnapshot {
    fn from_iter<I: IntoIterator<Item = (CurrencyCode, Decimal)>>(iter: I) -> Self {
        Self {
            rates: iter
                .into_iter()
                .map(|(code, rate)| (code.code().to_string(), rate))
                .collect(),
        }
    }
}

/// Trait for exchange rate providers.
#[async_trait]
pub trait RateGateway: Send + Sync {
    /// Get the gateway name.
    fn name(&self) -> &str;

    /// Fetch quotes for every result currency against `base`.
    async fn fetch_rates(&self, base: CurrencyCode) -> FxResult<RateSnapshot>;
}

/// Gateway returning the same constant table for every base currency.
///
/// Selected with `RATES_API_TYPE=Mock` for local runs without network access.
pub struct FixedRateGateway {
    snapshot: RateSnapshot,
}

impl FixedRateGateway {
    /// Create a gateway serving the given table.
    pub fn new(snapshot: RateSnapshot) -> Self {
        Self { snapshot }
    }
}

impl Default for FixedRateGateway {
    fn default() -> Self {
        Self::new(
            [
                (CurrencyCode::Usd, Decimal::new(5, 1)),
                (CurrencyCode::Eur, Decimal::ONE),
                (CurrencyCode::Mxn, Decimal::new(15, 1)),
            ]
            .into_iter()
            .collect(),
        )
    }
}

#[async_trait]
impl RateGateway for FixedRateGateway {
    fn name(&self) -> &str {
        "FIXED"
    }

    async fn fetch_rates(&self, base: CurrencyCode) -> FxResult<RateSnapshot> {
        debug!(base = %base, quotes = self.snapshot.len(), "Serving fixed rates");
        Ok(self.snapshot.clone())
    }
}

/// Which gateway implementation to wire in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    /// Live quotes from the Frankfurter API.
    Frankfurter,
    /// Constant quotes from [`FixedRateGateway`].
    Fixed,
}

impl FromStr for GatewayKind {
    type Err = std::convert::Infallible;

    /// Unknown values fall back to the fixed gateway.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Frankfurter" => GatewayKind::Frankfurter,
            _ => GatewayKind::Fixed,
        })
    }
}

/// Build a shared gateway of the requested kind.
pub fn build_gateway(
    kind: GatewayKind,
    base_url: &str,
    timeout: Duration,
) -> FxResult<Arc<dyn RateGateway>> {
    Ok(match kind {
        GatewayKind::Frankfurter => Arc::new(FrankfurterGateway::new(base_url, timeout)?),
        GatewayKind::Fixed => Arc::new(FixedRateGateway::default()),
    })
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone)]
enum Scripted {
    Rates(RateSnapshot),
    Fail(String),
    Panic,
}

/// Scriptable gateway for testing. Each base currency answers with rates,
/// an error or a panic; unscripted bases are unsupported.
#[cfg(any(test, feature = "test-utils"))]
pub struct StaticRateGateway {
    responses: dashmap::DashMap<CurrencyCode, Scripted>,
    calls: dashmap::DashMap<CurrencyCode, usize>,
    delay: Option<Duration>,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticRateGateway {
    /// Create a gateway with nothing scripted.
    pub fn new() -> Self {
        Self {
            responses: dashmap::DashMap::new(),
            calls: dashmap::DashMap::new(),
            delay: None,
        }
    }

    /// Delay every call, to exercise concurrent lookups.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `base` with the given quotes.
    pub fn set_rates(
        &self,
        base: CurrencyCode,
        rates: impl IntoIterator<Item = (CurrencyCode, Decimal)>,
    ) {
        self.responses.insert(base, Scripted::Rates(rates.into_iter().collect()));
    }

    /// Answer `base` with a provider error.
    pub fn fail_for(&self, base: CurrencyCode, message: impl Into<String>) {
        self.responses.insert(base, Scripted::Fail(message.into()));
    }

    /// Panic while answering `base`.
    pub fn panic_for(&self, base: CurrencyCode) {
        self.responses.insert(base, Scripted::Panic);
    }

    /// Number of calls made for `base`.
    pub fn calls_for(&self, base: CurrencyCode) -> usize {
        self.calls.get(&base).map(|c| *c).unwrap_or(0)
    }

    /// Number of calls made for all bases.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for StaticRateGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateGateway for StaticRateGateway {
    fn name(&self) -> &str {
        "STATIC"
    }

    async fn fetch_rates(&self, base: CurrencyCode) -> FxResult<RateSnapshot> {
        *self.calls.entry(base).or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.get(&base).map(|r| r.clone());
        match scripted {
            Some(Scripted::Rates(snapshot)) => Ok(snapshot),
            Some(Scripted::Fail(message)) => Err(FxError::Unavailable(message)),
            Some(Scripted::Panic) => panic!("scripted gateway panic for {base}"),
            None => Err(FxError::UnsupportedBase(base)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_fixed_gateway_serves_default_table() {
        let gateway = FixedRateGateway::default();
        let snapshot = gateway.fetch_rates(CurrencyCode::Usd).await.unwrap();

        assert_eq!(snapshot.quote(CurrencyCode::Usd), Some(dec!(0.5)));
        assert_eq!(snapshot.quote(CurrencyCode::Eur), Some(dec!(1)));
        assert_eq!(snapshot.quote(CurrencyCode::Mxn), Some(dec!(1.5)));
    }

    #[test]
    fn test_snapshot_missing_quote_is_none() {
        let snapshot: RateSnapshot = [(CurrencyCode::Eur, dec!(0.85))].into_iter().collect();

        assert_eq!(snapshot.quote(CurrencyCode::Eur), Some(dec!(0.85)));
        assert_eq!(snapshot.quote(CurrencyCode::Mxn), None);
    }

    #[test]
    fn test_gateway_kind_parse() {
        assert_eq!("Frankfurter".parse::<GatewayKind>().unwrap(), GatewayKind::Frankfurter);
        assert_eq!("Mock".parse::<GatewayKind>().unwrap(), GatewayKind::Fixed);
        assert_eq!("anything".parse::<GatewayKind>().unwrap(), GatewayKind::Fixed);
    }

    #[tokio::test]
    async fn test_static_gateway_scripts() {
        let gateway = StaticRateGateway::new();
        gateway.set_rates(CurrencyCode::Usd, [(CurrencyCode::Eur, dec!(0.85))]);
        gateway.fail_for(CurrencyCode::Eur, "provider down");

        let usd = gateway.fetch_rates(CurrencyCode::Usd).await.unwrap();
        assert_eq!(usd.quote(CurrencyCode::Eur), Some(dec!(0.85)));

        let eur = gateway.fetch_rates(CurrencyCode::Eur).await;
        assert!(matches!(eur, Err(FxError::Unavailable(_))));

        let mxn = gateway.fetch_rates(CurrencyCode::Mxn).await;
        assert!(matches!(mxn, Err(FxError::UnsupportedBase(CurrencyCode::Mxn))));

        assert_eq!(gateway.calls_for(CurrencyCode::Usd), 1);
        assert_eq!(gateway.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_build_fixed_gateway() {
        let gateway = build_gateway(GatewayKind::Fixed, "", Duration::from_secs(1)).unwrap();
        assert_eq!(gateway.name(), "FIXED");
    }
}
