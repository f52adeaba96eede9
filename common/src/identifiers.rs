//! Identifier types for Ratekeeper entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a rate request.
/// Uses UUID v7 for time-ordered identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateRequestId(Uuid);

impl RateRequestId {
    /// Create a new rate request ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RateRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RateRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RateRequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Collect the raw UUIDs of a slice of ids, for bulk database statements.
pub fn to_uuids(ids: &[RateRequestId]) -> Vec<Uuid> {
    ids.iter().map(|id| id.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_request_id_creation() {
        let id1 = RateRequestId::new();
        let id2 = RateRequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_rate_request_id_parse() {
        let uuid_str = "019456ab-1234-7def-8901-234567890abc";
        let id = RateRequestId::parse(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_rate_request_id_parse_rejects_garbage() {
        assert!(RateRequestId::parse("not-a-uuid").is_err());
    }
}
