use bl_schemas::{Bid, LogisticsProfile, Rfq, SecondFactorRecord, Shipment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{StoreError, StoreResult};

/// Logical collection name. Records are addressed as `{collection}/{key}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Rfqs,
    Bids,
    Shipments,
    LogisticsProfiles,
    SecondFactors,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rfqs => "rfqs",
            Self::Bids => "bids",
            Self::Shipments => "shipments",
            Self::LogisticsProfiles => "logistics_profiles",
            Self::SecondFactors => "second_factors",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rfqs" => Some(Self::Rfqs),
            "bids" => Some(Self::Bids),
            "shipments" => Some(Self::Shipments),
            "logistics_profiles" => Some(Self::LogisticsProfiles),
            "second_factors" => Some(Self::SecondFactors),
            _ => None,
        }
    }
}

/// Type-erased record, the unit a [`crate::WriteBatch`] carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Rfq(Rfq),
    Bid(Bid),
    Shipment(Shipment),
    LogisticsProfile(LogisticsProfile),
    SecondFactor(SecondFactorRecord),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Rfq(_) => Collection::Rfqs,
            Self::Bid(_) => Collection::Bids,
            Self::Shipment(_) => Collection::Shipments,
            Self::LogisticsProfile(_) => Collection::LogisticsProfiles,
            Self::SecondFactor(_) => Collection::SecondFactors,
        }
    }

    pub fn key(&self) -> String {
        match self {
            Self::Rfq(v) => v.key(),
            Self::Bid(v) => v.key(),
            Self::Shipment(v) => v.key(),
            Self::LogisticsProfile(v) => v.key(),
            Self::SecondFactor(v) => v.key(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Rfq(v) => v.created_at(),
            Self::Bid(v) => v.created_at(),
            Self::Shipment(v) => v.created_at(),
            Self::LogisticsProfile(v) => v.created_at(),
            Self::SecondFactor(v) => v.created_at(),
        }
    }

    pub fn to_json(&self) -> StoreResult<Value> {
        let v = match self {
            Self::Rfq(v) => serde_json::to_value(v),
            Self::Bid(v) => serde_json::to_value(v),
            Self::Shipment(v) => serde_json::to_value(v),
            Self::LogisticsProfile(v) => serde_json::to_value(v),
            Self::SecondFactor(v) => serde_json::to_value(v),
        };
        v.map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_json(collection: Collection, doc: Value) -> StoreResult<Self> {
        fn de<T: serde::de::DeserializeOwned>(doc: Value) -> StoreResult<T> {
            serde_json::from_value(doc).map_err(|e| StoreError::Serialization(e.to_string()))
        }
        Ok(match collection {
            Collection::Rfqs => Self::Rfq(de(doc)?),
            Collection::Bids => Self::Bid(de(doc)?),
            Collection::Shipments => Self::Shipment(de(doc)?),
            Collection::LogisticsProfiles => Self::LogisticsProfile(de(doc)?),
            Collection::SecondFactors => Self::SecondFactor(de(doc)?),
        })
    }
}

/// A record type the store knows how to key and file.
pub trait Entity: Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn key(&self) -> String;
    fn created_at(&self) -> DateTime<Utc>;
    fn into_record(self) -> Record;
    fn from_record(record: Record) -> Option<Self>;
}

macro_rules! entity {
    ($t:ty, $variant:ident, $coll:ident, |$v:ident| $key:expr) => {
        impl Entity for $t {
            const COLLECTION: Collection = Collection::$coll;

            fn key(&self) -> String {
                let $v = self;
                $key
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }

            fn into_record(self) -> Record {
                Record::$variant(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

entity!(Rfq, Rfq, Rfqs, |v| v.id.as_str().to_string());
entity!(Bid, Bid, Bids, |v| v.id.as_str().to_string());
entity!(Shipment, Shipment, Shipments, |v| v.id.as_str().to_string());
entity!(LogisticsProfile, LogisticsProfile, LogisticsProfiles, |v| v
    .supplier_id
    .as_str()
    .to_string());
entity!(SecondFactorRecord, SecondFactor, SecondFactors, |v| v
    .principal
    .as_str()
    .to_string());
