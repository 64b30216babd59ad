use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Authenticated caller identity (buyer, supplier or both).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RfqId(pub String);

impl RfqId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Fresh random id for a newly published RFQ.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Bid identity, derived from `(rfq, supplier)`.
///
/// The derivation is the idempotency key for bid submission: a supplier can
/// hold at most one bid per RFQ, and resubmitting overwrites it in place.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidId(pub String);

impl BidId {
    pub fn derive(rfq_id: &RfqId, supplier_id: &PrincipalId) -> Self {
        Self(format!("{}_{}", rfq_id.as_str(), supplier_id.as_str()))
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(pub String);

impl ShipmentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_as_str!(PrincipalId, RfqId, BidId, ShipmentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bid_id_is_deterministic_per_rfq_and_supplier() {
        let rfq = RfqId::new("r1");
        let a = BidId::derive(&rfq, &PrincipalId::new("s1"));
        let b = BidId::derive(&rfq, &PrincipalId::new("s1"));
        let c = BidId::derive(&rfq, &PrincipalId::new("s2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "r1_s1");
    }
}
