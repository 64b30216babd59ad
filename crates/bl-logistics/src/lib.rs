//! bl-logistics
//!
//! Shipments for awarded RFQs and the supplier logistics profiles buyers
//! consult before awarding.
//!
//! A shipment's history is append-only: every status change and every note
//! appends one entry, and [`bl_schemas::replay_history`] over that history
//! reproduces the stored status.

mod profiles;
mod tracker;

pub use tracker::ShipmentTracker;
