//! Request and response types for the bl-daemon HTTP endpoints.
//!
//! Entity payloads (`Rfq`, `Bid`, `Shipment`, …) are serialized as-is from
//! `bl-schemas`; only envelopes and request bodies live here.

use bl_schemas::{BidId, RfqId, SecondFactorStatus, ShipmentStatus};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// "validation" | "conflict" | "authorization" | "not_found" |
    /// "consistency" | "unavailable" | "unauthenticated" | "bad_request"
    pub error: &'static str,
    pub message: String,
    /// True when the session must pass a second-factor challenge first.
    pub challenge_required: bool,
}

// ---------------------------------------------------------------------------
// RFQs and bids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub rfq_id: RfqId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RfqListParams {
    pub buyer: Option<String>,
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityRequest {
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WithdrawRequest {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BidListParams {
    pub supplier: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwardRequest {
    pub bid_id: BidId,
}

// ---------------------------------------------------------------------------
// Shipments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShipmentListParams {
    pub buyer: Option<String>,
    pub supplier: Option<String>,
    pub rfq: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRequest {
    pub status: ShipmentStatus,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

// ---------------------------------------------------------------------------
// Two-factor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorStatusResponse {
    pub status: SecondFactorStatus,
    pub session_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}
