//! Shipment records and the shipment status machine.
//!
//! ```text
//!   scheduled ──► in_transit ──► delivered (term.)
//!       │             │
//!       └─────────────┴──────► cancelled (term.)
//! ```
//!
//! Every accepted transition appends exactly one history entry. History is
//! append-only and its timestamps never go backwards, so replaying it from
//! `scheduled` reproduces the current status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PrincipalId, ProcureError, ProcureResult, RfqId, ShipmentId};

pub const SCHEDULED_NOTE: &str = "Shipment scheduled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Scheduled,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "in_transit" => Some(Self::InTransit),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!(
            (self, next),
            (Scheduled, InTransit) | (InTransit, Delivered) | (Scheduled, Cancelled) | (InTransit, Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: ShipmentStatus,
    pub note: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<PrincipalId>,
}

/// Inputs for a new shipment. Addresses are checked by the tracker before
/// this reaches [`Shipment::schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShipment {
    pub rfq_id: RfqId,
    pub supplier_id: PrincipalId,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub buyer_company: Option<String>,
    #[serde(default)]
    pub supplier_name: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub tracking_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub rfq_id: RfqId,
    pub buyer_id: PrincipalId,
    pub supplier_id: PrincipalId,
    pub origin: String,
    pub destination: String,
    pub buyer_company: Option<String>,
    pub supplier_name: Option<String>,
    pub carrier: Option<String>,
    pub tracking_reference: Option<String>,
    pub status: ShipmentStatus,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// New shipment in `Scheduled` with its scheduling event already in history.
    pub fn schedule(
        id: ShipmentId,
        buyer_id: PrincipalId,
        new: NewShipment,
        now: DateTime<Utc>,
    ) -> ProcureResult<Self> {
        if new.origin.trim().is_empty() {
            return Err(ProcureError::validation("origin must not be empty"));
        }
        if new.destination.trim().is_empty() {
            return Err(ProcureError::validation("destination must not be empty"));
        }
        Ok(Self {
            id,
            rfq_id: new.rfq_id,
            history: vec![HistoryEntry {
                status: ShipmentStatus::Scheduled,
                note: SCHEDULED_NOTE.to_string(),
                timestamp: now,
                actor: Some(buyer_id.clone()),
            }],
            buyer_id,
            supplier_id: new.supplier_id,
            origin: new.origin,
            destination: new.destination,
            buyer_company: new.buyer_company,
            supplier_name: new.supplier_name,
            carrier: new.carrier,
            tracking_reference: new.tracking_reference,
            status: ShipmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_party(&self, principal: &PrincipalId) -> bool {
        &self.buyer_id == principal || &self.supplier_id == principal
    }

    pub fn ensure_party(&self, principal: &PrincipalId) -> ProcureResult<()> {
        if self.is_party(principal) {
            Ok(())
        } else {
            Err(ProcureError::not_permitted(format!(
                "{principal} is neither buyer nor supplier of shipment {}",
                self.id
            )))
        }
    }

    pub fn advance(
        &mut self,
        next: ShipmentStatus,
        note: impl Into<String>,
        actor: &PrincipalId,
        now: DateTime<Utc>,
    ) -> ProcureResult<()> {
        if next == self.status {
            return Err(self.conflict(format!("already {}", next.as_str())));
        }
        if !self.status.can_transition_to(next) {
            return Err(self.conflict(format!(
                "illegal transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.append(note.into(), actor, now);
        Ok(())
    }

    /// Append a free-form note under the current status.
    pub fn annotate(
        &mut self,
        note: impl Into<String>,
        actor: &PrincipalId,
        now: DateTime<Utc>,
    ) -> ProcureResult<()> {
        let note = note.into();
        if note.trim().is_empty() {
            return Err(ProcureError::validation("note must not be empty"));
        }
        self.append(note, actor, now);
        Ok(())
    }

    fn append(&mut self, note: String, actor: &PrincipalId, now: DateTime<Utc>) {
        // Server time can step backwards; history order must not.
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.history.push(HistoryEntry {
            status: self.status,
            note,
            timestamp,
            actor: Some(actor.clone()),
        });
        self.updated_at = timestamp;
    }

    fn conflict(&self, reason: String) -> ProcureError {
        ProcureError::conflict("shipment", self.id.as_str(), self.status.as_str(), reason)
    }
}

/// Replay a history from its scheduling entry and return the status it
/// leads to. Entries repeating the current status are notes.
pub fn replay_history(history: &[HistoryEntry]) -> ProcureResult<ShipmentStatus> {
    let Some(first) = history.first() else {
        return Err(ProcureError::validation("history is empty"));
    };
    if first.status != ShipmentStatus::Scheduled {
        return Err(ProcureError::conflict(
            "shipment_history",
            "0",
            first.status.as_str(),
            "history must start at scheduled",
        ));
    }
    let mut current = first.status;
    let mut prev_ts = first.timestamp;
    for (i, entry) in history.iter().enumerate().skip(1) {
        if entry.timestamp < prev_ts {
            return Err(ProcureError::conflict(
                "shipment_history",
                i.to_string(),
                current.as_str(),
                "timestamps go backwards",
            ));
        }
        if entry.status != current {
            if !current.can_transition_to(entry.status) {
                return Err(ProcureError::conflict(
                    "shipment_history",
                    i.to_string(),
                    current.as_str(),
                    format!("illegal transition to {}", entry.status.as_str()),
                ));
            }
            current = entry.status;
        }
        prev_ts = entry.timestamp;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ShipmentStatus::*;

    fn shipment() -> Shipment {
        Shipment::schedule(
            ShipmentId::new("sh1"),
            PrincipalId::new("buyer"),
            NewShipment {
                rfq_id: RfqId::new("r1"),
                supplier_id: PrincipalId::new("s1"),
                origin: "Yard A".into(),
                destination: "Site B".into(),
                buyer_company: None,
                supplier_name: None,
                carrier: None,
                tracking_reference: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn transition_table_matches_diagram() {
        let all = [Scheduled, InTransit, Delivered, Cancelled];
        let allowed = [
            (Scheduled, InTransit),
            (InTransit, Delivered),
            (Scheduled, Cancelled),
            (InTransit, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
        assert!(Delivered.is_terminal() && Cancelled.is_terminal());
        assert!(!Scheduled.is_terminal() && !InTransit.is_terminal());
    }

    #[test]
    fn schedule_records_initial_event() {
        let s = shipment();
        assert_eq!(s.history.len(), 1);
        assert_eq!(s.history[0].status, Scheduled);
        assert_eq!(s.history[0].note, SCHEDULED_NOTE);
    }

    #[test]
    fn same_status_and_illegal_edges_conflict_without_appending() {
        let actor = PrincipalId::new("buyer");
        let mut s = shipment();
        assert!(matches!(
            s.advance(Scheduled, "again", &actor, Utc::now()),
            Err(ProcureError::Conflict { .. })
        ));
        assert!(matches!(
            s.advance(Delivered, "skip", &actor, Utc::now()),
            Err(ProcureError::Conflict { .. })
        ));
        assert_eq!(s.history.len(), 1);
    }

    #[test]
    fn history_timestamps_never_go_backwards() {
        let actor = PrincipalId::new("buyer");
        let mut s = shipment();
        let t0 = s.history[0].timestamp;
        s.advance(InTransit, "left yard", &actor, t0 - Duration::seconds(30))
            .unwrap();
        assert_eq!(s.history[1].timestamp, t0);
    }

    #[test]
    fn replay_reproduces_final_status() {
        let actor = PrincipalId::new("s1");
        let mut s = shipment();
        let t = s.created_at;
        s.annotate("loading", &actor, t + Duration::seconds(1)).unwrap();
        s.advance(InTransit, "", &actor, t + Duration::seconds(2)).unwrap();
        s.advance(Cancelled, "truck broke", &actor, t + Duration::seconds(3))
            .unwrap();
        assert_eq!(replay_history(&s.history).unwrap(), s.status);
    }

    #[test]
    fn replay_rejects_illegal_sequences() {
        let mut s = shipment();
        s.history.push(HistoryEntry {
            status: Delivered,
            note: String::new(),
            timestamp: s.created_at,
            actor: None,
        });
        assert!(replay_history(&s.history).is_err());
        assert!(replay_history(&[]).is_err());
    }
}
