//! bl-award
//!
//! The award coordinator: the one place where an RFQ and its bids change
//! together.
//!
//! # Unit of work
//! One award is one [`bl_store::WriteBatch`]:
//!
//! - the RFQ, conditioned on the version read, goes `open → awarded`;
//! - the chosen bid goes `submitted → awarded`;
//! - every other `submitted` sibling goes to `declined`.
//!
//! Withdrawn and already-declined siblings are not written. A sibling that
//! changes between read and commit (a late resubmission, a withdrawal) fails
//! the version check and the whole attempt is re-run from fresh reads.
//! Observers therefore see either the pre-award state or the complete
//! post-award state, never a mix.

use std::sync::Arc;

use bl_schemas::{Bid, BidId, ProcureError, ProcureResult, Rfq, RfqId};
use bl_store::{BidQuery, ServiceDeps, TxError, Versioned, WriteBatch};
use bl_twofactor::{SecondFactorGate, Session};
use serde::Serialize;
use serde_json::json;
use tracing::info;

/// What a successful award changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardOutcome {
    pub rfq: Rfq,
    pub winner: Bid,
    pub declined: Vec<BidId>,
}

#[derive(Clone)]
pub struct AwardCoordinator {
    deps: ServiceDeps,
    gate: Arc<dyn SecondFactorGate>,
}

impl AwardCoordinator {
    pub fn new(deps: ServiceDeps, gate: Arc<dyn SecondFactorGate>) -> Self {
        Self { deps, gate }
    }

    /// Award `bid_id` on `rfq_id` on behalf of the session's principal.
    ///
    /// # Errors
    /// - `Authorization` if the second factor is missing or the caller is not
    ///   the RFQ's buyer;
    /// - `NotFound` for an unknown RFQ or bid;
    /// - `Conflict` if the RFQ is not open (including already awarded) or
    ///   the bid is not a submitted bid of this RFQ;
    /// - `Consistency` if contention outlasted the retry budget. Nothing is
    ///   written in that case.
    pub async fn award(
        &self,
        session: &Session,
        rfq_id: &RfqId,
        bid_id: &BidId,
    ) -> ProcureResult<AwardOutcome> {
        self.gate.require_verified(session).await?;
        let actor = session.principal();

        let outcome = self
            .deps
            .retry
            .run("award", |_| async move {
                let Versioned {
                    value: mut rfq,
                    version: rfq_version,
                } = self
                    .deps
                    .store
                    .get_rfq(rfq_id)
                    .await?
                    .ok_or_else(|| ProcureError::not_found("rfq", rfq_id.as_str()))?;
                rfq.ensure_owned_by(actor)?;
                let now = self.deps.clock.now();
                rfq.mark_awarded(bid_id, actor, now)?;

                let Versioned {
                    value: mut winner,
                    version: winner_version,
                } = self
                    .deps
                    .store
                    .get_bid(bid_id)
                    .await?
                    .ok_or_else(|| ProcureError::not_found("bid", bid_id.as_str()))?;
                winner.ensure_awardable(rfq_id)?;
                winner.mark_awarded(now);

                let siblings = self
                    .deps
                    .store
                    .query_bids(&BidQuery::ForRfq(rfq_id.clone()))
                    .await?;

                let mut batch = WriteBatch::new();
                batch.update(rfq.clone(), rfq_version);
                batch.update(winner.clone(), winner_version);
                let mut declined = Vec::new();
                for Versioned { mut value, version } in siblings {
                    if value.id == winner.id {
                        continue;
                    }
                    if value.decline(now) {
                        declined.push(value.id.clone());
                        batch.update(value, version);
                    }
                }

                self.deps.store.commit(batch).await?;
                Ok::<_, TxError>(AwardOutcome {
                    rfq,
                    winner,
                    declined,
                })
            })
            .await?;

        info!(
            rfq_id = %rfq_id,
            bid_id = %bid_id,
            declined = outcome.declined.len(),
            "rfq awarded"
        );
        self.deps.events.log_event(
            "bid_awarded",
            json!({
                "rfq_id": rfq_id,
                "bid_id": bid_id,
                "supplier_id": outcome.winner.supplier_id,
                "amount": outcome.winner.amount,
                "declined": outcome.declined,
            }),
        );
        Ok(outcome)
    }
}
