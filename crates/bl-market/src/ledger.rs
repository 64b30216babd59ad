use bl_schemas::{Bid, BidDraft, BidId, PrincipalId, ProcureError, ProcureResult, RfqId};
use bl_store::{BidQuery, LiveQuery, ServiceDeps, TxError, Versioned, WriteBatch};
use serde_json::json;
use tracing::info;

/// Bids keyed by `(rfq, supplier)`.
///
/// A submission writes the bid and touches the parent RFQ in one batch,
/// conditioned on the RFQ version it read. An award that lands in between
/// therefore forces a re-read, and the re-read sees the RFQ is no longer open.
#[derive(Clone)]
pub struct BidLedger {
    deps: ServiceDeps,
}

impl BidLedger {
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    /// Create or overwrite the supplier's bid on an open RFQ.
    pub async fn submit_or_update(
        &self,
        rfq_id: &RfqId,
        supplier: &PrincipalId,
        draft: BidDraft,
    ) -> ProcureResult<Bid> {
        draft.validate()?;
        let bid_id = BidId::derive(rfq_id, supplier);

        let (bid, resubmitted) = self
            .deps
            .retry
            .run("submit_bid", |_| {
                let draft = draft.clone();
                let bid_id = &bid_id;
                async move {
                    let Versioned {
                        value: mut rfq,
                        version: rfq_version,
                    } = self
                        .deps
                        .store
                        .get_rfq(rfq_id)
                        .await?
                        .ok_or_else(|| ProcureError::not_found("rfq", rfq_id.as_str()))?;
                    rfq.ensure_open()?;
                    if rfq.is_owned_by(supplier) {
                        return Err(TxError::Domain(ProcureError::not_permitted(
                            "a buyer cannot bid on their own RFQ",
                        )));
                    }

                    let existing = self.deps.store.get_bid(bid_id).await?;
                    let bid_version = existing.as_ref().map(|v| v.version);
                    let now = self.deps.clock.now();
                    let bid = Bid::submit(
                        existing.map(Versioned::into_value),
                        rfq_id,
                        supplier,
                        draft,
                        now,
                    )?;
                    rfq.touch_bid(now);

                    let mut batch = WriteBatch::new();
                    batch.put(bid.clone(), bid_version);
                    batch.update(rfq, rfq_version);
                    self.deps.store.commit(batch).await?;
                    Ok::<_, TxError>((bid, bid_version.is_some()))
                }
            })
            .await?;

        info!(rfq_id = %rfq_id, bid_id = %bid.id, amount = bid.amount, resubmitted, "bid submitted");
        self.deps.events.log_event(
            "bid_submitted",
            json!({
                "rfq_id": rfq_id,
                "bid_id": bid.id,
                "supplier_id": supplier,
                "amount": bid.amount,
                "resubmitted": resubmitted,
            }),
        );
        Ok(bid)
    }

    /// Withdraw a submitted bid, keeping `note` (or a default) on record.
    ///
    /// Only while the RFQ is open. The RFQ version rides in the same batch,
    /// so a close or award racing the withdrawal forces a re-read.
    pub async fn withdraw(
        &self,
        rfq_id: &RfqId,
        supplier: &PrincipalId,
        note: Option<String>,
    ) -> ProcureResult<Bid> {
        let bid_id = BidId::derive(rfq_id, supplier);
        let bid = self
            .deps
            .retry
            .run("withdraw_bid", |_| {
                let note = note.clone();
                let bid_id = &bid_id;
                async move {
                    let Versioned {
                        value: mut rfq,
                        version: rfq_version,
                    } = self
                        .deps
                        .store
                        .get_rfq(rfq_id)
                        .await?
                        .ok_or_else(|| ProcureError::not_found("rfq", rfq_id.as_str()))?;
                    rfq.ensure_open()?;

                    let Versioned { mut value, version } = self
                        .deps
                        .store
                        .get_bid(bid_id)
                        .await?
                        .ok_or_else(|| ProcureError::not_found("bid", bid_id.as_str()))?;
                    let now = self.deps.clock.now();
                    value.withdraw(note, now)?;
                    rfq.touch_bid(now);

                    let mut batch = WriteBatch::new();
                    batch.update(value.clone(), version);
                    batch.update(rfq, rfq_version);
                    self.deps.store.commit(batch).await?;
                    Ok::<_, TxError>(value)
                }
            })
            .await?;

        info!(rfq_id = %rfq_id, bid_id = %bid.id, "bid withdrawn");
        self.deps.events.log_event(
            "bid_withdrawn",
            json!({ "rfq_id": rfq_id, "bid_id": bid.id, "supplier_id": supplier }),
        );
        Ok(bid)
    }

    pub async fn get(&self, rfq_id: &RfqId, supplier: &PrincipalId) -> ProcureResult<Option<Bid>> {
        Ok(self
            .deps
            .store
            .get_bid(&BidId::derive(rfq_id, supplier))
            .await?
            .map(Versioned::into_value))
    }

    pub fn list_for_rfq(&self, rfq_id: &RfqId) -> LiveQuery<BidQuery> {
        LiveQuery::new(self.deps.store.clone(), BidQuery::ForRfq(rfq_id.clone()))
    }

    pub fn list_for_supplier(&self, supplier: &PrincipalId) -> LiveQuery<BidQuery> {
        LiveQuery::new(
            self.deps.store.clone(),
            BidQuery::ForSupplier(supplier.clone()),
        )
    }
}
