//! A supplier's logistics profile is merge-upserted and observable live.

use std::sync::Arc;
use std::time::Duration;

use bl_logistics::ShipmentTracker;
use bl_schemas::{ManualClock, NoopEventSink, PrincipalId, ProfileUpdate};
use bl_store::{MemStore, RetryPolicy, ServiceDeps};
use bl_twofactor::{Totp, TwoFactorGate};
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;

fn tracker() -> ShipmentTracker {
    let deps = ServiceDeps::new(
        Arc::new(MemStore::new()),
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap(),
        )),
        Arc::new(NoopEventSink),
        RetryPolicy::default(),
    );
    let gate = Arc::new(TwoFactorGate::new(deps.clone(), Totp::default(), "BuildLink"));
    ShipmentTracker::new(deps, gate, None)
}

#[tokio::test]
async fn upsert_merges_fields_and_streams_each_revision() {
    let t = tracker();
    let supplier = PrincipalId::new("s1");
    assert!(t.profile(&supplier).await.unwrap().is_none());

    let mut watch = t.watch_profile(&supplier).subscribe();
    let first = tokio::time::timeout(Duration::from_secs(2), watch.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(first.is_empty());

    t.upsert_profile(
        &supplier,
        ProfileUpdate {
            fleet_size: Some(4),
            coverage_areas: Some(vec!["north".into(), "harbour".into()]),
            ..ProfileUpdate::default()
        },
    )
    .await
    .unwrap();
    let saved = t
        .upsert_profile(
            &supplier,
            ProfileUpdate {
                contact_person: Some("Dana".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(saved.fleet_size, 4);
    assert_eq!(saved.coverage_areas, vec!["north", "harbour"]);
    assert_eq!(saved.contact_person.as_deref(), Some("Dana"));

    let latest = loop {
        let snap = tokio::time::timeout(Duration::from_secs(2), watch.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if snap.first().and_then(|p| p.contact_person.as_deref()) == Some("Dana") {
            break snap;
        }
    };
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].fleet_size, 4);
}
