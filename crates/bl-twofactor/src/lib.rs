//! bl-twofactor
//!
//! Second-factor enrollment and session verification.
//!
//! Per principal (persisted): `unenrolled → enrolling(secret) → enrolled`.
//! Per session (in memory, owned by the caller): `unverified → verified`,
//! sticky for the session's lifetime. A new login gets a new, unverified
//! [`Session`].
//!
//! Only [`TwoFactorGate`] can mark a session verified; there is no public
//! setter. Award and shipment operations consult the gate through the
//! [`SecondFactorGate`] trait before touching the store.

mod gate;
mod session;
pub mod totp;

pub use gate::{EnrollmentPayload, SecondFactorGate, TwoFactorGate};
pub use session::Session;
pub use totp::Totp;
