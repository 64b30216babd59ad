use std::sync::Arc;

use bl_schemas::{
    AddressValidator, BidId, NewShipment, PrincipalId, ProcureError,
    ProcureResult, RfqId, RfqStatus, Shipment, ShipmentId, ShipmentStatus, SCHEDULED_NOTE,
};
use bl_store::{LiveQuery, ServiceDeps, ShipmentQuery, TxError, Versioned, WriteBatch};
use bl_twofactor::{SecondFactorGate, Session};
use serde_json::json;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// ShipmentTracker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ShipmentTracker {
    pub(crate) deps: ServiceDeps,
    gate: Arc<dyn SecondFactorGate>,
    addresses: Option<Arc<dyn AddressValidator>>,
}

impl ShipmentTracker {
    pub fn new(
        deps: ServiceDeps,
        gate: Arc<dyn SecondFactorGate>,
        addresses: Option<Arc<dyn AddressValidator>>,
    ) -> Self {
        Self {
            deps,
            gate,
            addresses,
        }
    }

    /// Schedule a shipment for the RFQ's winning supplier.
    ///
    /// Only the RFQ's buyer may create it, and only for the supplier whose
    /// bid was awarded. Repeated calls create distinct shipments.
    pub async fn create(&self, session: &Session, new: NewShipment) -> ProcureResult<Shipment> {
        self.gate.require_verified(session).await?;
        let buyer = session.principal();

        let rfq = self
            .deps
            .store
            .get_rfq(&new.rfq_id)
            .await?
            .map(Versioned::into_value)
            .ok_or_else(|| ProcureError::not_found("rfq", new.rfq_id.as_str()))?;
        rfq.ensure_owned_by(buyer)?;

        let expected = BidId::derive(&rfq.id, &new.supplier_id);
        let awarded_to_supplier = rfq.status == RfqStatus::Awarded
            && rfq.awarded_bid_id.as_ref() == Some(&expected);
        if !awarded_to_supplier {
            return Err(ProcureError::conflict(
                "rfq",
                rfq.id.as_str(),
                rfq.status.as_str(),
                format!("no bid from {} was awarded", new.supplier_id),
            ));
        }

        let mut new = new;
        new.origin = self.checked_address("origin", &new.origin).await?;
        new.destination = self.checked_address("destination", &new.destination).await?;

        let shipment = Shipment::schedule(
            ShipmentId::generate(),
            buyer.clone(),
            new,
            self.deps.clock.now(),
        )?;
        let mut batch = WriteBatch::new();
        batch.create(shipment.clone());
        self.deps.store.commit(batch).await?;

        info!(shipment_id = %shipment.id, rfq_id = %shipment.rfq_id, supplier = %shipment.supplier_id, "shipment scheduled");
        self.deps.events.log_event(
            "shipment_created",
            json!({
                "shipment_id": shipment.id,
                "rfq_id": shipment.rfq_id,
                "buyer_id": shipment.buyer_id,
                "supplier_id": shipment.supplier_id,
            }),
        );
        Ok(shipment)
    }

    /// Move a shipment along `scheduled → in_transit → delivered`, or cancel
    /// it before delivery. Appends one history entry.
    pub async fn advance(
        &self,
        session: &Session,
        id: &ShipmentId,
        next: ShipmentStatus,
        note: Option<String>,
    ) -> ProcureResult<Shipment> {
        self.gate.require_verified(session).await?;
        let actor = session.principal();
        let note = note
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_note(next).to_string());

        let (shipment, previous) = self
            .deps
            .retry
            .run("advance_shipment", |_| {
                let note = note.clone();
                async move {
                    let Versioned { mut value, version } = self.load(id).await?;
                    value.ensure_party(actor)?;
                    let previous = value.status;
                    value.advance(next, note, actor, self.deps.clock.now())?;
                    let mut batch = WriteBatch::new();
                    batch.update(value.clone(), version);
                    self.deps.store.commit(batch).await?;
                    Ok::<_, TxError>((value, previous))
                }
            })
            .await?;

        info!(
            shipment_id = %id,
            from = previous.as_str(),
            to = next.as_str(),
            "shipment status updated"
        );
        self.deps.events.log_event(
            "shipment_status_updated",
            json!({
                "shipment_id": id,
                "rfq_id": shipment.rfq_id,
                "from": previous.as_str(),
                "to": next.as_str(),
                "actor": actor,
            }),
        );
        Ok(shipment)
    }

    /// Append a note under the current status.
    pub async fn annotate(
        &self,
        session: &Session,
        id: &ShipmentId,
        note: &str,
    ) -> ProcureResult<Shipment> {
        self.gate.require_verified(session).await?;
        let actor = session.principal();
        let shipment = self
            .deps
            .retry
            .run("annotate_shipment", |_| async move {
                let Versioned { mut value, version } = self.load(id).await?;
                value.ensure_party(actor)?;
                value.annotate(note, actor, self.deps.clock.now())?;
                let mut batch = WriteBatch::new();
                batch.update(value.clone(), version);
                self.deps.store.commit(batch).await?;
                Ok::<_, TxError>(value)
            })
            .await?;
        debug!(shipment_id = %id, entries = shipment.history.len(), "shipment annotated");
        Ok(shipment)
    }

    pub async fn get(&self, id: &ShipmentId) -> ProcureResult<Shipment> {
        Ok(self.load(id).await?.into_value())
    }

    pub fn list_for_buyer(&self, buyer: &PrincipalId) -> LiveQuery<ShipmentQuery> {
        LiveQuery::new(
            self.deps.store.clone(),
            ShipmentQuery::ForBuyer(buyer.clone()),
        )
    }

    pub fn list_for_supplier(&self, supplier: &PrincipalId) -> LiveQuery<ShipmentQuery> {
        LiveQuery::new(
            self.deps.store.clone(),
            ShipmentQuery::ForSupplier(supplier.clone()),
        )
    }

    pub fn list_for_rfq(&self, rfq_id: &RfqId) -> LiveQuery<ShipmentQuery> {
        LiveQuery::new(self.deps.store.clone(), ShipmentQuery::ForRfq(rfq_id.clone()))
    }

    async fn load(&self, id: &ShipmentId) -> ProcureResult<Versioned<Shipment>> {
        self.deps
            .store
            .get_shipment(id)
            .await?
            .ok_or_else(|| ProcureError::not_found("shipment", id.as_str()))
    }

    async fn checked_address(&self, field: &str, raw: &str) -> ProcureResult<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProcureError::validation(format!("{field} must not be empty")));
        }
        let Some(validator) = &self.addresses else {
            return Ok(trimmed.to_string());
        };
        let check = validator.validate(trimmed).await?;
        if !check.is_valid {
            return Err(ProcureError::validation(format!(
                "{field} address could not be validated"
            )));
        }
        Ok(check
            .validated_address
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| trimmed.to_string()))
    }
}

fn default_note(status: ShipmentStatus) -> &'static str {
    match status {
        ShipmentStatus::Scheduled => SCHEDULED_NOTE,
        ShipmentStatus::InTransit => "Shipment in transit",
        ShipmentStatus::Delivered => "Shipment delivered",
        ShipmentStatus::Cancelled => "Shipment cancelled",
    }
}
