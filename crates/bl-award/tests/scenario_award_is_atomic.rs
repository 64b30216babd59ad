//! An award flips the RFQ, the winner and every submitted sibling in one
//! commit: at most one bid ever wins, withdrawn bids keep their status, and
//! contention that outlasts the retry budget leaves nothing behind.

use std::sync::Arc;

use bl_audit::MemoryEventSink;
use bl_award::AwardCoordinator;
use bl_market::{BidLedger, RfqRegistry};
use bl_schemas::{
    AuthorizationFailure, BidDraft, BidId, BidStatus, Clock, LineItem, ManualClock, PrincipalId,
    ProcureError, RfqDetails, RfqId, RfqStatus,
};
use bl_store::{Collection, MemStore, RetryPolicy, ServiceDeps};
use bl_twofactor::{Session, Totp, TwoFactorGate};
use chrono::{TimeZone, Utc};

struct Fixture {
    mem: Arc<MemStore>,
    clock: Arc<ManualClock>,
    events: Arc<MemoryEventSink>,
    rfqs: RfqRegistry,
    bids: BidLedger,
    awards: AwardCoordinator,
}

fn fixture() -> Fixture {
    let mem = Arc::new(MemStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 2, 10, 0, 0).unwrap(),
    ));
    let events = Arc::new(MemoryEventSink::new());
    let deps = ServiceDeps::new(
        mem.clone(),
        clock.clone(),
        events.clone(),
        RetryPolicy::new(3, std::time::Duration::ZERO),
    );
    let gate = Arc::new(TwoFactorGate::new(deps.clone(), Totp::default(), "BuildLink"));
    Fixture {
        mem,
        clock,
        events,
        rfqs: RfqRegistry::new(deps.clone()),
        bids: BidLedger::new(deps.clone()),
        awards: AwardCoordinator::new(deps, gate),
    }
}

impl Fixture {
    fn session(&self, who: &str) -> Session {
        Session::start(PrincipalId::new(who), self.clock.now())
    }

    async fn rfq_with_bids(&self, suppliers: &[(&str, i64)]) -> RfqId {
        let rfq = self
            .rfqs
            .publish(
                &PrincipalId::new("buyer"),
                RfqDetails {
                    title: "formwork".into(),
                    description: String::new(),
                    due_date: None,
                    budget: None,
                    line_items: vec![LineItem {
                        description: "plywood 18mm".into(),
                        quantity: 120,
                        unit: "sheet".into(),
                    }],
                    delivery_location: None,
                },
            )
            .await
            .unwrap();
        for (supplier, amount) in suppliers {
            self.bids
                .submit_or_update(
                    &rfq,
                    &PrincipalId::new(*supplier),
                    BidDraft {
                        amount: *amount,
                        lead_time: "3 days".into(),
                        message: String::new(),
                        supplier_name: None,
                    },
                )
                .await
                .unwrap();
        }
        rfq
    }

    async fn status_of(&self, rfq: &RfqId, supplier: &str) -> BidStatus {
        self.bids
            .get(rfq, &PrincipalId::new(supplier))
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

#[tokio::test]
async fn award_declines_submitted_siblings_and_spares_withdrawn() {
    let f = fixture();
    let rfq = f.rfq_with_bids(&[("s1", 100), ("s2", 120), ("s3", 90)]).await;
    f.bids.withdraw(&rfq, &PrincipalId::new("s3"), None).await.unwrap();

    let winner = BidId::derive(&rfq, &PrincipalId::new("s1"));
    let outcome = f.awards.award(&f.session("buyer"), &rfq, &winner).await.unwrap();

    assert_eq!(outcome.rfq.status, RfqStatus::Awarded);
    assert_eq!(outcome.rfq.awarded_bid_id, Some(winner.clone()));
    assert_eq!(outcome.declined, vec![BidId::derive(&rfq, &PrincipalId::new("s2"))]);
    assert_eq!(f.status_of(&rfq, "s1").await, BidStatus::Awarded);
    assert_eq!(f.status_of(&rfq, "s2").await, BidStatus::Declined);
    assert_eq!(f.status_of(&rfq, "s3").await, BidStatus::Withdrawn);
    assert_eq!(f.events.names().last().map(String::as_str), Some("bid_awarded"));
}

#[tokio::test]
async fn re_award_and_foreign_bids_are_rejected_without_side_effects() {
    let f = fixture();
    let rfq = f.rfq_with_bids(&[("s1", 100), ("s2", 120)]).await;
    let other = f.rfq_with_bids(&[("s9", 50)]).await;
    let buyer = f.session("buyer");

    let foreign = BidId::derive(&other, &PrincipalId::new("s9"));
    assert!(matches!(
        f.awards.award(&buyer, &rfq, &foreign).await,
        Err(ProcureError::Conflict { .. })
    ));
    assert_eq!(f.rfqs.get(&rfq).await.unwrap().status, RfqStatus::Open);
    assert_eq!(f.status_of(&other, "s9").await, BidStatus::Submitted);

    let first = BidId::derive(&rfq, &PrincipalId::new("s1"));
    f.awards.award(&buyer, &rfq, &first).await.unwrap();

    let second = BidId::derive(&rfq, &PrincipalId::new("s2"));
    let err = f.awards.award(&buyer, &rfq, &second).await.unwrap_err();
    match err {
        ProcureError::Conflict { reason, .. } => assert!(reason.contains(first.as_str())),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(f.status_of(&rfq, "s1").await, BidStatus::Awarded);
    assert_eq!(f.status_of(&rfq, "s2").await, BidStatus::Declined);
}

#[tokio::test]
async fn only_the_buyer_may_award_and_missing_records_are_not_found() {
    let f = fixture();
    let rfq = f.rfq_with_bids(&[("s1", 100)]).await;
    let bid = BidId::derive(&rfq, &PrincipalId::new("s1"));

    assert!(matches!(
        f.awards.award(&f.session("s1"), &rfq, &bid).await,
        Err(ProcureError::Authorization(AuthorizationFailure::NotPermitted(_)))
    ));
    assert!(matches!(
        f.awards.award(&f.session("buyer"), &RfqId::new("missing"), &bid).await,
        Err(ProcureError::NotFound { entity: "rfq", .. })
    ));
    assert!(matches!(
        f.awards
            .award(&f.session("buyer"), &rfq, &BidId::new("missing"))
            .await,
        Err(ProcureError::NotFound { entity: "bid", .. })
    ));
    assert_eq!(f.rfqs.get(&rfq).await.unwrap().status, RfqStatus::Open);
}

#[tokio::test]
async fn exhausted_contention_leaves_no_partial_award() {
    let f = fixture();
    let rfq = f.rfq_with_bids(&[("s1", 100), ("s2", 120)]).await;
    let bid = BidId::derive(&rfq, &PrincipalId::new("s1"));

    f.mem.inject_contention(3);
    let err = f.awards.award(&f.session("buyer"), &rfq, &bid).await.unwrap_err();
    assert!(matches!(err, ProcureError::Consistency { attempts: 3, .. }));

    assert_eq!(f.rfqs.get(&rfq).await.unwrap().status, RfqStatus::Open);
    assert_eq!(f.status_of(&rfq, "s1").await, BidStatus::Submitted);
    assert_eq!(f.status_of(&rfq, "s2").await, BidStatus::Submitted);
    assert!(!f.events.names().iter().any(|n| n == "bid_awarded"));

    // The budget is per call; a later attempt goes through.
    f.awards.award(&f.session("buyer"), &rfq, &bid).await.unwrap();
    assert_eq!(f.mem.count(Collection::Bids), 2);
}

#[tokio::test]
async fn concurrent_awards_produce_exactly_one_winner() {
    let f = Arc::new(fixture());
    let rfq = f
        .rfq_with_bids(&[("s1", 100), ("s2", 110), ("s3", 120), ("s4", 130)])
        .await;

    let mut tasks = Vec::new();
    for supplier in ["s1", "s2", "s3", "s4"] {
        let f = Arc::clone(&f);
        let rfq = rfq.clone();
        tasks.push(tokio::spawn(async move {
            let bid = BidId::derive(&rfq, &PrincipalId::new(supplier));
            f.awards.award(&f.session("buyer"), &rfq, &bid).await
        }));
    }

    let mut wins = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => wins += 1,
            Err(ProcureError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(wins, 1);

    let all = f.bids.list_for_rfq(&rfq).snapshot().await.unwrap();
    let awarded: Vec<_> = all.iter().filter(|b| b.status == BidStatus::Awarded).collect();
    assert_eq!(awarded.len(), 1);
    assert!(all
        .iter()
        .filter(|b| b.id != awarded[0].id)
        .all(|b| b.status == BidStatus::Declined));
    assert_eq!(
        f.rfqs.get(&rfq).await.unwrap().awarded_bid_id.as_ref(),
        Some(&awarded[0].id)
    );
}
