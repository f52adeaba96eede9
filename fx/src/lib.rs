//! Ratekeeper FX Gateways
//!
//! Rate lookup gateways used by the refresh pipeline. One call to
//! [`RateGateway::fetch_rates`] returns quotes for every result currency the
//! provider knows for a given base currency.
//!
//! # Example
//!
//! ```rust,ignore
//! use ratekeeper_common::CurrencyCode;
//! use ratekeeper_fx::{FrankfurterGateway, RateGateway};
//!
//! let gateway = FrankfurterGateway::new("https://api.frankfurter.dev", timeout)?;
//! let snapshot = gateway.fetch_rates(CurrencyCode::Usd).await?;
//! let eur = snapshot.quote(CurrencyCode::Eur);
//! ```

pub mod error;
pub mod frankfurter;
pub mod provider;

pub use error::{FxError, FxResult};
pub use frankfurter::FrankfurterGateway;
pub use provider::{build_gateway, FixedRateGateway, GatewayKind, RateGateway, RateSnapshot};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::StaticRateGateway;
