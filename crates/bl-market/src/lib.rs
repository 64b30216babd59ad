//! bl-market
//!
//! The two independent halves of the marketplace:
//!
//! - [`RfqRegistry`] owns the RFQ lifecycle (`open → awarded | closed`);
//! - [`BidLedger`] owns bids, one per `(rfq, supplier)`.
//!
//! They only meet in the award coordinator.

mod ledger;
mod registry;

pub use ledger::BidLedger;
pub use registry::RfqRegistry;
