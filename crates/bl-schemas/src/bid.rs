use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BidId, PrincipalId, ProcureError, ProcureResult, RfqId};

pub const DEFAULT_WITHDRAWAL_NOTE: &str = "Withdrawn by supplier";

/// Bid lifecycle. Only `Submitted` is live; every other state is final
/// from the supplier's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Submitted,
    Awarded,
    Declined,
    Withdrawn,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Awarded => "awarded",
            Self::Declined => "declined",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "awarded" => Some(Self::Awarded),
            "declined" => Some(Self::Declined),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }
}

/// Supplier-editable fields of a bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidDraft {
    /// Minor currency units; must be positive.
    pub amount: i64,
    pub lead_time: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub supplier_name: Option<String>,
}

impl BidDraft {
    pub fn validate(&self) -> ProcureResult<()> {
        if self.amount <= 0 {
            return Err(ProcureError::validation(format!(
                "bid amount must be positive (got {})",
                self.amount
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub rfq_id: RfqId,
    pub supplier_id: PrincipalId,
    pub supplier_name: Option<String>,
    pub amount: i64,
    pub lead_time: String,
    pub message: String,
    pub status: BidStatus,
    pub withdrawal_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bid {
    /// Apply a submission on top of the existing record for the same
    /// `(rfq, supplier)` key, or create it.
    ///
    /// The result always has `status = Submitted`. `created_at` survives
    /// resubmission.
    pub fn submit(
        existing: Option<Bid>,
        rfq_id: &RfqId,
        supplier_id: &PrincipalId,
        draft: BidDraft,
        now: DateTime<Utc>,
    ) -> ProcureResult<Bid> {
        draft.validate()?;
        let id = BidId::derive(rfq_id, supplier_id);
        match existing {
            Some(mut bid) => {
                if bid.status != BidStatus::Submitted {
                    return Err(bid.conflict("bid can no longer be changed by the supplier"));
                }
                bid.amount = draft.amount;
                bid.lead_time = draft.lead_time;
                bid.message = draft.message;
                if draft.supplier_name.is_some() {
                    bid.supplier_name = draft.supplier_name;
                }
                bid.updated_at = now;
                Ok(bid)
            }
            None => Ok(Bid {
                id,
                rfq_id: rfq_id.clone(),
                supplier_id: supplier_id.clone(),
                supplier_name: draft.supplier_name,
                amount: draft.amount,
                lead_time: draft.lead_time,
                message: draft.message,
                status: BidStatus::Submitted,
                withdrawal_note: None,
                created_at: now,
                updated_at: now,
            }),
        }
    }

    pub fn withdraw(&mut self, note: Option<String>, now: DateTime<Utc>) -> ProcureResult<()> {
        if self.status != BidStatus::Submitted {
            return Err(self.conflict("only a submitted bid can be withdrawn"));
        }
        self.status = BidStatus::Withdrawn;
        self.withdrawal_note = Some(
            note.filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WITHDRAWAL_NOTE.to_string()),
        );
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_awardable(&self, rfq_id: &RfqId) -> ProcureResult<()> {
        if &self.rfq_id != rfq_id {
            return Err(ProcureError::conflict(
                "bid",
                self.id.as_str(),
                self.status.as_str(),
                format!("bid not awardable: belongs to rfq {}", self.rfq_id),
            ));
        }
        if self.status != BidStatus::Submitted {
            return Err(self.conflict("bid not awardable"));
        }
        Ok(())
    }

    pub fn mark_awarded(&mut self, now: DateTime<Utc>) {
        self.status = BidStatus::Awarded;
        self.updated_at = now;
    }

    /// Decline a losing sibling. Withdrawn and already-declined bids are
    /// left as they are; returns whether the record changed.
    pub fn decline(&mut self, now: DateTime<Utc>) -> bool {
        match self.status {
            BidStatus::Submitted => {
                self.status = BidStatus::Declined;
                self.updated_at = now;
                true
            }
            BidStatus::Awarded | BidStatus::Declined | BidStatus::Withdrawn => false,
        }
    }

    fn conflict(&self, reason: impl Into<String>) -> ProcureError {
        ProcureError::conflict("bid", self.id.as_str(), self.status.as_str(), reason)
    }
}
