//! bl-schemas
//!
//! Strongly typed procurement records shared by every BuildLink crate:
//! RFQs, bids, shipments, supplier logistics profiles and second-factor
//! enrollments, plus the error taxonomy and the ports for collaborators
//! that live outside this workspace (address validation, event logging).
//!
//! Status enums are closed and carry their own transition rules; services
//! never mutate a status field directly.

mod bid;
mod clock;
mod error;
mod ids;
mod logistics;
mod ports;
mod rfq;
mod second_factor;
mod shipment;

pub use bid::{Bid, BidDraft, BidStatus, DEFAULT_WITHDRAWAL_NOTE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthorizationFailure, ProcureError, ProcureResult};
pub use ids::{BidId, PrincipalId, RfqId, ShipmentId};
pub use logistics::{LogisticsProfile, ProfileUpdate};
pub use ports::{AddressCheck, AddressValidator, EventSink, NoopEventSink};
pub use rfq::{ActivityEntry, LineItem, Rfq, RfqDetails, RfqStatus};
pub use second_factor::{SecondFactorRecord, SecondFactorStatus};
pub use shipment::{
    replay_history, HistoryEntry, NewShipment, Shipment, ShipmentStatus, SCHEDULED_NOTE,
};
