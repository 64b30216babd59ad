//! Shipments exist only for the awarded supplier, move through a closed set
//! of transitions, and keep an append-only history that replays to the
//! stored status.

use std::sync::Arc;

use async_trait::async_trait;
use bl_audit::MemoryEventSink;
use bl_award::AwardCoordinator;
use bl_logistics::ShipmentTracker;
use bl_market::{BidLedger, RfqRegistry};
use bl_schemas::{
    replay_history, AddressCheck, AddressValidator, AuthorizationFailure, BidDraft, BidId, Clock,
    LineItem, ManualClock, NewShipment, PrincipalId, ProcureError, ProcureResult, RfqDetails,
    RfqId, ShipmentStatus, SCHEDULED_NOTE,
};
use bl_store::{MemStore, RetryPolicy, ServiceDeps};
use bl_twofactor::{Session, Totp, TwoFactorGate};
use chrono::{Duration, TimeZone, Utc};

struct UppercaseAddresses;

#[async_trait]
impl AddressValidator for UppercaseAddresses {
    async fn validate(&self, address: &str) -> ProcureResult<AddressCheck> {
        Ok(AddressCheck {
            is_valid: !address.contains("nowhere"),
            validated_address: Some(address.to_uppercase()),
        })
    }
}

struct Fixture {
    clock: Arc<ManualClock>,
    events: Arc<MemoryEventSink>,
    rfqs: RfqRegistry,
    bids: BidLedger,
    awards: AwardCoordinator,
    shipments: ShipmentTracker,
}

fn fixture(addresses: Option<Arc<dyn AddressValidator>>) -> Fixture {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap(),
    ));
    let events = Arc::new(MemoryEventSink::new());
    let deps = ServiceDeps::new(
        Arc::new(MemStore::new()),
        clock.clone(),
        events.clone(),
        RetryPolicy::new(3, std::time::Duration::ZERO),
    );
    let gate = Arc::new(TwoFactorGate::new(deps.clone(), Totp::default(), "BuildLink"));
    Fixture {
        clock,
        events,
        rfqs: RfqRegistry::new(deps.clone()),
        bids: BidLedger::new(deps.clone()),
        awards: AwardCoordinator::new(deps.clone(), gate.clone()),
        shipments: ShipmentTracker::new(deps, gate, addresses),
    }
}

impl Fixture {
    fn session(&self, who: &str) -> Session {
        Session::start(PrincipalId::new(who), self.clock.now())
    }

    /// RFQ with bids from s1 and s2, awarded to s1.
    async fn awarded_rfq(&self) -> RfqId {
        let buyer = PrincipalId::new("buyer");
        let rfq = self
            .rfqs
            .publish(
                &buyer,
                RfqDetails {
                    title: "ready-mix".into(),
                    description: String::new(),
                    due_date: None,
                    budget: None,
                    line_items: vec![LineItem {
                        description: "C30 concrete".into(),
                        quantity: 12,
                        unit: "m3".into(),
                    }],
                    delivery_location: None,
                },
            )
            .await
            .unwrap();
        for (s, amount) in [("s1", 700), ("s2", 650)] {
            self.bids
                .submit_or_update(
                    &rfq,
                    &PrincipalId::new(s),
                    BidDraft {
                        amount,
                        lead_time: "1 day".into(),
                        message: String::new(),
                        supplier_name: None,
                    },
                )
                .await
                .unwrap();
        }
        self.awards
            .award(
                &self.session("buyer"),
                &rfq,
                &BidId::derive(&rfq, &PrincipalId::new("s1")),
            )
            .await
            .unwrap();
        rfq
    }
}

fn new_shipment(rfq: &RfqId, supplier: &str) -> NewShipment {
    NewShipment {
        rfq_id: rfq.clone(),
        supplier_id: PrincipalId::new(supplier),
        origin: "Plant 2, Quarry Rd".into(),
        destination: "Lot 7, Harbour St".into(),
        buyer_company: Some("Harbour Build".into()),
        supplier_name: None,
        carrier: Some("own fleet".into()),
        tracking_reference: None,
    }
}

#[tokio::test]
async fn scheduled_to_delivered_keeps_ordered_history() {
    let f = fixture(None);
    let rfq = f.awarded_rfq().await;
    let buyer = f.session("buyer");
    let supplier = f.session("s1");

    let created = f.shipments.create(&buyer, new_shipment(&rfq, "s1")).await.unwrap();
    assert_eq!(created.status, ShipmentStatus::Scheduled);
    assert_eq!(created.history.len(), 1);
    assert_eq!(created.history[0].note, SCHEDULED_NOTE);

    f.clock.advance(Duration::hours(2));
    f.shipments
        .advance(&supplier, &created.id, ShipmentStatus::InTransit, Some("left plant".into()))
        .await
        .unwrap();
    f.clock.advance(Duration::hours(1));
    let done = f
        .shipments
        .advance(&buyer, &created.id, ShipmentStatus::Delivered, None)
        .await
        .unwrap();

    let statuses: Vec<_> = done.history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![
            ShipmentStatus::Scheduled,
            ShipmentStatus::InTransit,
            ShipmentStatus::Delivered
        ]
    );
    assert!(done.history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(replay_history(&done.history).unwrap(), ShipmentStatus::Delivered);

    let err = f
        .shipments
        .advance(&buyer, &created.id, ShipmentStatus::InTransit, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcureError::Conflict { .. }));
    assert_eq!(f.shipments.get(&created.id).await.unwrap().history.len(), 3);

    let names = f.events.names();
    assert_eq!(names.iter().filter(|n| *n == "shipment_status_updated").count(), 2);
    assert!(names.iter().any(|n| n == "shipment_created"));
}

#[tokio::test]
async fn only_the_awarded_supplier_gets_a_shipment() {
    let f = fixture(None);
    let rfq = f.awarded_rfq().await;

    assert!(matches!(
        f.shipments.create(&f.session("buyer"), new_shipment(&rfq, "s2")).await,
        Err(ProcureError::Conflict { .. })
    ));
    assert!(matches!(
        f.shipments.create(&f.session("s1"), new_shipment(&rfq, "s1")).await,
        Err(ProcureError::Authorization(AuthorizationFailure::NotPermitted(_)))
    ));

    let open = f
        .rfqs
        .publish(
            &PrincipalId::new("buyer"),
            RfqDetails {
                title: "sand".into(),
                description: String::new(),
                due_date: None,
                budget: None,
                line_items: vec![LineItem {
                    description: "washed sand".into(),
                    quantity: 3,
                    unit: "t".into(),
                }],
                delivery_location: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        f.shipments.create(&f.session("buyer"), new_shipment(&open, "s1")).await,
        Err(ProcureError::Conflict { .. })
    ));
    assert!(f.shipments.list_for_rfq(&rfq).snapshot().await.unwrap().is_empty());
}

#[tokio::test]
async fn outsiders_cannot_touch_a_shipment_and_notes_do_not_change_status() {
    let f = fixture(None);
    let rfq = f.awarded_rfq().await;
    let shipment = f
        .shipments
        .create(&f.session("buyer"), new_shipment(&rfq, "s1"))
        .await
        .unwrap();

    assert!(matches!(
        f.shipments
            .advance(&f.session("s2"), &shipment.id, ShipmentStatus::InTransit, None)
            .await,
        Err(ProcureError::Authorization(AuthorizationFailure::NotPermitted(_)))
    ));

    let noted = f
        .shipments
        .annotate(&f.session("s1"), &shipment.id, "driver assigned")
        .await
        .unwrap();
    assert_eq!(noted.status, ShipmentStatus::Scheduled);
    assert_eq!(noted.history.len(), 2);
    assert_eq!(noted.history[1].status, ShipmentStatus::Scheduled);
    assert_eq!(replay_history(&noted.history).unwrap(), ShipmentStatus::Scheduled);

    assert!(matches!(
        f.shipments.annotate(&f.session("s1"), &shipment.id, " ").await,
        Err(ProcureError::Validation(_))
    ));

    let cancelled = f
        .shipments
        .advance(&f.session("buyer"), &shipment.id, ShipmentStatus::Cancelled, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, ShipmentStatus::Cancelled);
    assert_eq!(f.shipments.list_for_supplier(&PrincipalId::new("s1")).snapshot().await.unwrap().len(), 1);
}

#[tokio::test]
async fn addresses_are_validated_and_normalised_when_a_validator_is_set() {
    let f = fixture(Some(Arc::new(UppercaseAddresses)));
    let rfq = f.awarded_rfq().await;
    let buyer = f.session("buyer");

    let mut bad = new_shipment(&rfq, "s1");
    bad.destination = "road to nowhere".into();
    assert!(matches!(
        f.shipments.create(&buyer, bad).await,
        Err(ProcureError::Validation(_))
    ));

    let mut blank = new_shipment(&rfq, "s1");
    blank.origin = "   ".into();
    assert!(matches!(
        f.shipments.create(&buyer, blank).await,
        Err(ProcureError::Validation(_))
    ));

    let ok = f.shipments.create(&buyer, new_shipment(&rfq, "s1")).await.unwrap();
    assert_eq!(ok.origin, "PLANT 2, QUARRY RD");
    assert_eq!(ok.destination, "LOT 7, HARBOUR ST");
}

#[tokio::test]
async fn racing_advances_do_not_both_win() {
    let f = Arc::new(fixture(None));
    let rfq = f.awarded_rfq().await;
    let shipment = f
        .shipments
        .create(&f.session("buyer"), new_shipment(&rfq, "s1"))
        .await
        .unwrap();

    let a = {
        let f = Arc::clone(&f);
        let id = shipment.id.clone();
        tokio::spawn(async move {
            f.shipments
                .advance(&f.session("buyer"), &id, ShipmentStatus::InTransit, None)
                .await
        })
    };
    let b = {
        let f = Arc::clone(&f);
        let id = shipment.id.clone();
        tokio::spawn(async move {
            f.shipments
                .advance(&f.session("s1"), &id, ShipmentStatus::InTransit, None)
                .await
        })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ProcureError::Conflict { .. }))));

    let stored = f.shipments.get(&shipment.id).await.unwrap();
    assert_eq!(stored.history.len(), 2);
}
