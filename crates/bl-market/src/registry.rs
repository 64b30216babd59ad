use bl_schemas::{PrincipalId, ProcureError, ProcureResult, Rfq, RfqDetails, RfqId};
use bl_store::{LiveQuery, RfqQuery, ServiceDeps, TxError, Versioned, WriteBatch};
use serde_json::json;
use tracing::info;

#[derive(Clone)]
pub struct RfqRegistry {
    deps: ServiceDeps,
}

impl RfqRegistry {
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    /// Validate and store a new open RFQ owned by `buyer`.
    pub async fn publish(&self, buyer: &PrincipalId, details: RfqDetails) -> ProcureResult<RfqId> {
        let id = RfqId::generate();
        let rfq = Rfq::publish(id.clone(), buyer.clone(), details, self.deps.clock.now())?;
        let line_items = rfq.line_items.len();
        let budget = rfq.budget;

        let mut batch = WriteBatch::new();
        batch.create(rfq);
        self.deps.store.commit(batch).await?;

        info!(rfq_id = %id, buyer = %buyer, line_items, "rfq published");
        self.deps.events.log_event(
            "rfq_created",
            json!({ "rfq_id": id, "buyer_id": buyer, "line_items": line_items, "budget": budget }),
        );
        Ok(id)
    }

    pub async fn get(&self, id: &RfqId) -> ProcureResult<Rfq> {
        self.deps
            .store
            .get_rfq(id)
            .await?
            .map(Versioned::into_value)
            .ok_or_else(|| ProcureError::not_found("rfq", id.as_str()))
    }

    /// Close an open RFQ. Closing anything but an open RFQ is a conflict.
    pub async fn close(&self, actor: &PrincipalId, id: &RfqId) -> ProcureResult<Rfq> {
        let rfq = self
            .deps
            .retry
            .run("close_rfq", |_| async move {
                let Versioned { mut value, version } = self
                    .deps
                    .store
                    .get_rfq(id)
                    .await?
                    .ok_or_else(|| ProcureError::not_found("rfq", id.as_str()))?;
                value.ensure_owned_by(actor)?;
                value.close(actor, self.deps.clock.now())?;
                let mut batch = WriteBatch::new();
                batch.update(value.clone(), version);
                self.deps.store.commit(batch).await?;
                Ok::<_, TxError>(value)
            })
            .await?;

        info!(rfq_id = %id, "rfq closed");
        self.deps
            .events
            .log_event("rfq_closed", json!({ "rfq_id": id, "buyer_id": actor }));
        Ok(rfq)
    }

    /// Append a buyer note to the RFQ activity log.
    pub async fn record_activity(
        &self,
        actor: &PrincipalId,
        id: &RfqId,
        message: &str,
    ) -> ProcureResult<()> {
        if message.trim().is_empty() {
            return Err(ProcureError::validation("activity message must not be empty"));
        }
        self.deps
            .retry
            .run("record_rfq_activity", |_| async move {
                let Versioned { mut value, version } = self
                    .deps
                    .store
                    .get_rfq(id)
                    .await?
                    .ok_or_else(|| ProcureError::not_found("rfq", id.as_str()))?;
                value.ensure_owned_by(actor)?;
                value.push_activity(actor, message, self.deps.clock.now());
                let mut batch = WriteBatch::new();
                batch.update(value, version);
                self.deps.store.commit(batch).await?;
                Ok::<_, TxError>(())
            })
            .await
    }

    pub fn list_by_buyer(&self, buyer: &PrincipalId) -> LiveQuery<RfqQuery> {
        LiveQuery::new(self.deps.store.clone(), RfqQuery::ByBuyer(buyer.clone()))
    }

    pub fn list_open(&self) -> LiveQuery<RfqQuery> {
        LiveQuery::new(self.deps.store.clone(), RfqQuery::Open)
    }
}
