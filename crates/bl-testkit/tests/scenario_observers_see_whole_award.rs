//! Live observers of an RFQ's bids see the award as one transition: the
//! snapshot after the award already has the winner and every declined
//! sibling, never a half-applied set.

use std::time::Duration;

use bl_schemas::{Bid, BidId, BidStatus, PrincipalId};
use bl_store::SnapshotStream;
use bl_testkit::{bid, details, Harness};
use futures_util::StreamExt;

async fn next(stream: &mut SnapshotStream<Bid>) -> Vec<Bid> {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("snapshot in time")
        .expect("stream open")
        .expect("snapshot ok")
}

fn statuses(bids: &[Bid]) -> Vec<(String, BidStatus)> {
    let mut v: Vec<_> = bids
        .iter()
        .map(|b| (b.supplier_id.to_string(), b.status))
        .collect();
    v.sort();
    v
}

#[tokio::test]
async fn every_snapshot_is_pre_award_or_fully_awarded() {
    let h = Harness::new();
    let buyer = h.login("buyer");
    let rfq = h
        .rfqs
        .publish(buyer.principal(), details("paint", &[("exterior 20l", 40, "tin")], None))
        .await
        .unwrap();
    for (s, amount) in [("a", 10), ("b", 11), ("c", 12)] {
        h.bids
            .submit_or_update(&rfq, &PrincipalId::new(s), bid(amount))
            .await
            .unwrap();
    }

    let live = h.bids.list_for_rfq(&rfq);
    let mut buyer_view = live.subscribe();
    let mut second_view = live.subscribe();
    assert_eq!(next(&mut buyer_view).await.len(), 3);
    assert_eq!(next(&mut second_view).await.len(), 3);

    h.awards
        .award(&buyer, &rfq, &BidId::derive(&rfq, &PrincipalId::new("b")))
        .await
        .unwrap();

    let expected = vec![
        ("a".to_string(), BidStatus::Declined),
        ("b".to_string(), BidStatus::Awarded),
        ("c".to_string(), BidStatus::Declined),
    ];
    assert_eq!(statuses(&next(&mut buyer_view).await), expected);
    assert_eq!(statuses(&next(&mut second_view).await), expected);

    // A late subscriber starts from the settled state.
    let mut late = live.subscribe();
    assert_eq!(statuses(&next(&mut late).await), expected);
}

#[tokio::test]
async fn resubmission_updates_the_single_row_observers_see() {
    let h = Harness::new();
    let buyer = h.login("buyer");
    let rfq = h
        .rfqs
        .publish(buyer.principal(), details("gravel", &[("20mm", 30, "t")], None))
        .await
        .unwrap();
    let supplier = PrincipalId::new("quarry");

    let mut view = h.bids.list_for_supplier(&supplier).subscribe();
    assert!(next(&mut view).await.is_empty());

    h.bids.submit_or_update(&rfq, &supplier, bid(500)).await.unwrap();
    let first = next(&mut view).await;
    assert_eq!(first.len(), 1);

    h.clock.advance(chrono::Duration::minutes(1));
    h.bids.submit_or_update(&rfq, &supplier, bid(480)).await.unwrap();
    let second = next(&mut view).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, first[0].id);
    assert_eq!(second[0].amount, 480);
}
