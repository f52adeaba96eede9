//! Ratekeeper Common Types
//!
//! This crate contains shared types used across Ratekeeper, including
//! currency codes, rate request identifiers, the rate request lifecycle
//! and the error taxonomy shared by the store, gateway and refresher.

pub mod currency;
pub mod error;
pub mod identifiers;
pub mod rate_request;
pub mod time;

pub use currency::*;
pub use error::*;
pub use identifiers::*;
pub use rate_request::*;
pub use time::*;
