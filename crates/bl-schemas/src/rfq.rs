use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{BidId, PrincipalId, ProcureError, ProcureResult, RfqId};

// ---------------------------------------------------------------------------
// RfqStatus
// ---------------------------------------------------------------------------

/// `Open` is the only state that accepts bids, awards or a close.
/// `Awarded` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfqStatus {
    Open,
    Awarded,
    Closed,
}

impl RfqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Awarded => "awarded",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "awarded" => Some(Self::Awarded),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

// ---------------------------------------------------------------------------
// Details
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit: String,
}

/// Buyer-supplied RFQ content, validated once at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfqDetails {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: Option<NaiveDate>,
    /// Minor currency units.
    pub budget: Option<i64>,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub delivery_location: Option<String>,
}

impl RfqDetails {
    pub fn validate(&self) -> ProcureResult<()> {
        if self.title.trim().is_empty() {
            return Err(ProcureError::validation("title must not be empty"));
        }
        if self.line_items.is_empty() {
            return Err(ProcureError::validation(
                "an RFQ needs at least one line item",
            ));
        }
        for (i, item) in self.line_items.iter().enumerate() {
            if item.description.trim().is_empty() {
                return Err(ProcureError::validation(format!(
                    "line item {i}: description must not be empty"
                )));
            }
            if item.quantity <= 0 {
                return Err(ProcureError::validation(format!(
                    "line item {i}: quantity must be positive (got {})",
                    item.quantity
                )));
            }
            if item.unit.trim().is_empty() {
                return Err(ProcureError::validation(format!(
                    "line item {i}: unit must not be empty"
                )));
            }
        }
        if let Some(budget) = self.budget {
            if budget <= 0 {
                return Err(ProcureError::validation(format!(
                    "budget must be positive (got {budget})"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub actor: PrincipalId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rfq
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rfq {
    pub id: RfqId,
    pub buyer_id: PrincipalId,
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub budget: Option<i64>,
    pub line_items: Vec<LineItem>,
    pub delivery_location: Option<String>,
    pub status: RfqStatus,
    pub awarded_bid_id: Option<BidId>,
    pub last_bid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activity: Vec<ActivityEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rfq {
    /// Build a freshly published, open RFQ. Fails on invalid details.
    pub fn publish(
        id: RfqId,
        buyer_id: PrincipalId,
        details: RfqDetails,
        now: DateTime<Utc>,
    ) -> ProcureResult<Self> {
        details.validate()?;
        Ok(Self {
            id,
            buyer_id,
            title: details.title,
            description: details.description,
            due_date: details.due_date,
            budget: details.budget,
            line_items: details.line_items,
            delivery_location: details.delivery_location,
            status: RfqStatus::Open,
            awarded_bid_id: None,
            last_bid_at: None,
            activity: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        &self.buyer_id == principal
    }

    pub fn ensure_owned_by(&self, principal: &PrincipalId) -> ProcureResult<()> {
        if self.is_owned_by(principal) {
            Ok(())
        } else {
            Err(ProcureError::not_permitted(format!(
                "{} is not the buyer of rfq {}",
                principal, self.id
            )))
        }
    }

    pub fn ensure_open(&self) -> ProcureResult<()> {
        match self.status {
            RfqStatus::Open => Ok(()),
            other => Err(self.conflict(other, "RFQ not open")),
        }
    }

    pub fn close(&mut self, actor: &PrincipalId, now: DateTime<Utc>) -> ProcureResult<()> {
        self.ensure_open()?;
        self.status = RfqStatus::Closed;
        self.push_activity(actor, "RFQ closed", now);
        Ok(())
    }

    pub fn mark_awarded(
        &mut self,
        bid_id: &BidId,
        actor: &PrincipalId,
        now: DateTime<Utc>,
    ) -> ProcureResult<()> {
        if let Some(existing) = &self.awarded_bid_id {
            return Err(self.conflict(
                self.status,
                format!("already awarded to bid {existing}"),
            ));
        }
        self.ensure_open()?;
        self.status = RfqStatus::Awarded;
        self.awarded_bid_id = Some(bid_id.clone());
        self.push_activity(actor, format!("Awarded bid {bid_id}"), now);
        Ok(())
    }

    /// Record bid traffic for observers. Status is untouched.
    pub fn touch_bid(&mut self, now: DateTime<Utc>) {
        self.last_bid_at = Some(now);
        self.updated_at = now;
    }

    pub fn push_activity(
        &mut self,
        actor: &PrincipalId,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.activity.push(ActivityEntry {
            actor: actor.clone(),
            message: message.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    fn conflict(&self, state: RfqStatus, reason: impl Into<String>) -> ProcureError {
        ProcureError::conflict("rfq", self.id.as_str(), state.as_str(), reason)
    }
}
