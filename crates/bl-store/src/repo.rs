use async_trait::async_trait;
use bl_schemas::{
    Bid, BidId, LogisticsProfile, PrincipalId, Rfq, RfqId, RfqStatus, SecondFactorRecord,
    Shipment, ShipmentId,
};
use tokio::sync::broadcast;

use crate::{Change, StoreResult, Versioned, WriteBatch};

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------
//
// Every query returns records newest first by `created_at`, ties broken by
// key ascending.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RfqQuery {
    ByBuyer(PrincipalId),
    Open,
}

impl RfqQuery {
    pub fn matches(&self, rfq: &Rfq) -> bool {
        match self {
            Self::ByBuyer(buyer) => &rfq.buyer_id == buyer,
            Self::Open => rfq.status == RfqStatus::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidQuery {
    ForRfq(RfqId),
    ForSupplier(PrincipalId),
}

impl BidQuery {
    pub fn matches(&self, bid: &Bid) -> bool {
        match self {
            Self::ForRfq(rfq) => &bid.rfq_id == rfq,
            Self::ForSupplier(supplier) => &bid.supplier_id == supplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipmentQuery {
    ForBuyer(PrincipalId),
    ForSupplier(PrincipalId),
    ForRfq(RfqId),
}

impl ShipmentQuery {
    pub fn matches(&self, shipment: &Shipment) -> bool {
        match self {
            Self::ForBuyer(p) => &shipment.buyer_id == p,
            Self::ForSupplier(p) => &shipment.supplier_id == p,
            Self::ForRfq(r) => &shipment.rfq_id == r,
        }
    }
}

// ---------------------------------------------------------------------------
// Repository ports
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RfqRepository: Send + Sync {
    async fn get_rfq(&self, id: &RfqId) -> StoreResult<Option<Versioned<Rfq>>>;
    async fn query_rfqs(&self, query: &RfqQuery) -> StoreResult<Vec<Versioned<Rfq>>>;
}

#[async_trait]
pub trait BidRepository: Send + Sync {
    async fn get_bid(&self, id: &BidId) -> StoreResult<Option<Versioned<Bid>>>;
    async fn query_bids(&self, query: &BidQuery) -> StoreResult<Vec<Versioned<Bid>>>;
}

#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn get_shipment(&self, id: &ShipmentId) -> StoreResult<Option<Versioned<Shipment>>>;
    async fn query_shipments(
        &self,
        query: &ShipmentQuery,
    ) -> StoreResult<Vec<Versioned<Shipment>>>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_profile(
        &self,
        supplier: &PrincipalId,
    ) -> StoreResult<Option<Versioned<LogisticsProfile>>>;
}

#[async_trait]
pub trait SecondFactorRepository: Send + Sync {
    async fn get_second_factor(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<Option<Versioned<SecondFactorRecord>>>;
}

#[async_trait]
pub trait Transactional: Send + Sync {
    /// Apply every mutation or none. Returns one [`Change`] per record written.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<Vec<Change>>;
}

pub trait ChangeFeed: Send + Sync {
    /// Receives every committed change from now on.
    fn subscribe_changes(&self) -> broadcast::Receiver<Change>;
}

/// Everything a service needs from the record store.
pub trait Store:
    RfqRepository
    + BidRepository
    + ShipmentRepository
    + ProfileRepository
    + SecondFactorRepository
    + Transactional
    + ChangeFeed
{
}

impl<T> Store for T where
    T: RfqRepository
        + BidRepository
        + ShipmentRepository
        + ProfileRepository
        + SecondFactorRepository
        + Transactional
        + ChangeFeed
{
}
