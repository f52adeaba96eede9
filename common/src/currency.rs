//! Currency codes and pairs accepted by Ratekeeper.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RateError, Result};

/// ISO 4217 currency code from the closed set the service quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyCode {
    /// United States dollar.
    Usd,
    /// Euro.
    Eur,
    /// Mexican peso.
    Mxn,
}

impl CurrencyCode {
    /// Every supported currency, in declaration order.
    pub const ALL: [CurrencyCode; 3] = [CurrencyCode::Usd, CurrencyCode::Eur, CurrencyCode::Mxn];

    /// Get the ISO code.
    pub fn code(&self) -> &'static str {
        match self {
            CurrencyCode::Usd => "USD",
            CurrencyCode::Eur => "EUR",
            CurrencyCode::Mxn => "MXN",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CurrencyCode {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(CurrencyCode::Usd),
            "EUR" => Ok(CurrencyCode::Eur),
            "MXN" => Ok(CurrencyCode::Mxn),
            _ => Err(RateError::InvalidCurrencyCode(s.to_string())),
        }
    }
}

/// A (base, result) currency pair. Base and result always differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being converted from.
    pub base: CurrencyCode,
    /// Currency being converted to.
    pub result: CurrencyCode,
}

impl CurrencyPair {
    /// Create a pair, rejecting identical currencies.
    pub fn new(base: CurrencyCode, result: CurrencyCode) -> Result<Self> {
        if base == result {
            return Err(RateError::CurrenciesShouldDiffer(base));
        }
        Ok(Self { base, result })
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.result)
    }
}

/// Parse and validate a pair of raw currency codes.
pub fn validate_currency_pair(base: &str, result: &str) -> Result<CurrencyPair> {
    let base: CurrencyCode = base.parse()?;
    let result: CurrencyCode = result.parse()?;
    CurrencyPair::new(base, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_codes() {
        assert_eq!("USD".parse::<CurrencyCode>().unwrap(), CurrencyCode::Usd);
        assert_eq!("eur".parse::<CurrencyCode>().unwrap(), CurrencyCode::Eur);
        assert_eq!(" MXN ".parse::<CurrencyCode>().unwrap(), CurrencyCode::Mxn);
    }

    #[test]
    fn test_parse_unknown_code() {
        let err = "GBP".parse::<CurrencyCode>().unwrap_err();
        assert!(matches!(err, RateError::InvalidCurrencyCode(code) if code == "GBP"));
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for code in CurrencyCode::ALL {
            assert_eq!(code.to_string().parse::<CurrencyCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_pair_rejects_same_currency() {
        let err = CurrencyPair::new(CurrencyCode::Usd, CurrencyCode::Usd).unwrap_err();
        assert!(matches!(err, RateError::CurrenciesShouldDiffer(CurrencyCode::Usd)));
    }

    #[test]
    fn test_validate_currency_pair() {
        let pair = validate_currency_pair("USD", "EUR").unwrap();
        assert_eq!(pair.to_string(), "USD/EUR");

        assert!(matches!(
            validate_currency_pair("USD", "XXX"),
            Err(RateError::InvalidCurrencyCode(_))
        ));
        assert!(matches!(
            validate_currency_pair("eur", "EUR"),
            Err(RateError::CurrenciesShouldDiffer(_))
        ));
    }

    #[test]
    fn test_serde_uses_iso_code() {
        let json = serde_json::to_string(&CurrencyCode::Mxn).unwrap();
        assert_eq!(json, "\"MXN\"");
    }
}
