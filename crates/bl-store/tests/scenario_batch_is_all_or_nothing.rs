//! A write batch either applies every mutation or none of them, and each
//! successful commit bumps versions and announces one change per record.

use bl_schemas::{LineItem, PrincipalId, ProcureError, Rfq, RfqDetails, RfqId, RfqStatus};
use bl_store::{
    Change, ChangeFeed, Collection, MemStore, RetryPolicy, RfqQuery, RfqRepository, StoreError,
    Transactional, TxError, WriteBatch,
};
use chrono::{Duration, TimeZone, Utc};

fn rfq(id: &str, buyer: &str, minute: i64) -> Rfq {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute);
    Rfq::publish(
        RfqId::new(id),
        PrincipalId::new(buyer),
        RfqDetails {
            title: format!("rfq {id}"),
            description: String::new(),
            due_date: None,
            budget: None,
            line_items: vec![LineItem {
                description: "cement".into(),
                quantity: 40,
                unit: "bag".into(),
            }],
            delivery_location: None,
        },
        at,
    )
    .unwrap()
}

#[tokio::test]
async fn failed_expectation_aborts_whole_batch() {
    let store = MemStore::new();
    let mut seed = WriteBatch::new();
    seed.create(rfq("a", "b1", 0));
    store.commit(seed).await.unwrap();

    let stale = store.get_rfq(&RfqId::new("a")).await.unwrap().unwrap();
    let mut bump = stale.value.clone();
    bump.title = "renamed".into();
    let mut first = WriteBatch::new();
    first.update(bump, stale.version);
    store.commit(first).await.unwrap();

    // Second writer still holds version 1 and also creates a new record.
    let mut racing = WriteBatch::new();
    let mut closed = stale.value.clone();
    closed.status = RfqStatus::Closed;
    racing.update(closed, stale.version);
    racing.create(rfq("b", "b1", 1));
    let err = store.commit(racing).await.unwrap_err();
    assert!(matches!(err, StoreError::Contention { .. }));

    assert!(store.get_rfq(&RfqId::new("b")).await.unwrap().is_none());
    let now = store.get_rfq(&RfqId::new("a")).await.unwrap().unwrap();
    assert_eq!(now.version, 2);
    assert_eq!(now.value.status, RfqStatus::Open);
    assert_eq!(now.value.title, "renamed");
}

#[tokio::test]
async fn create_twice_is_contention_and_duplicates_are_rejected() {
    let store = MemStore::new();
    let mut b = WriteBatch::new();
    b.create(rfq("a", "b1", 0));
    store.commit(b.clone()).await.unwrap();
    assert!(matches!(
        store.commit(b).await,
        Err(StoreError::Contention { .. })
    ));

    let mut dup = WriteBatch::new();
    dup.create(rfq("x", "b1", 0)).create(rfq("x", "b1", 0));
    assert!(matches!(store.commit(dup).await, Err(StoreError::Backend(_))));
    assert_eq!(store.count(Collection::Rfqs), 1);
}

#[tokio::test]
async fn commit_announces_each_record_on_the_change_feed() {
    let store = MemStore::new();
    let mut rx = store.subscribe_changes();
    let mut b = WriteBatch::new();
    b.create(rfq("a", "b1", 0)).create(rfq("b", "b1", 1));
    store.commit(b).await.unwrap();

    let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    seen.sort_by_key(|c| format!("{c:?}"));
    assert_eq!(
        seen,
        vec![
            Change::Record {
                collection: Collection::Rfqs,
                id: "a".into(),
                version: 1
            },
            Change::Record {
                collection: Collection::Rfqs,
                id: "b".into(),
                version: 1
            },
        ]
    );
}

#[tokio::test]
async fn queries_are_newest_first_with_id_tiebreak() {
    let store = MemStore::new();
    let mut b = WriteBatch::new();
    b.create(rfq("old", "b1", 0))
        .create(rfq("new", "b1", 10))
        .create(rfq("tie-b", "b1", 5))
        .create(rfq("tie-a", "b1", 5))
        .create(rfq("other", "b2", 20));
    store.commit(b).await.unwrap();

    let ids: Vec<String> = store
        .query_rfqs(&RfqQuery::ByBuyer(PrincipalId::new("b1")))
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.value.id.0)
        .collect();
    assert_eq!(ids, vec!["new", "tie-a", "tie-b", "old"]);
}

#[tokio::test]
async fn retry_policy_gives_up_with_consistency_error() {
    let store = MemStore::new();
    store.inject_contention(10);
    let policy = RetryPolicy::new(3, std::time::Duration::ZERO);

    let mut attempts = 0;
    let err = policy
        .run("seed", |_| {
            attempts += 1;
            let store = &store;
            async move {
                let mut b = WriteBatch::new();
                b.create(rfq("a", "b1", 0));
                store.commit(b).await.map_err(TxError::from)
            }
        })
        .await
        .unwrap_err();

    assert_eq!(attempts, 3);
    assert!(matches!(err, ProcureError::Consistency { attempts: 3, .. }));
    assert_eq!(store.count(Collection::Rfqs), 0);
}

#[tokio::test]
async fn retry_policy_recovers_from_transient_contention() {
    let store = MemStore::new();
    store.inject_contention(2);
    let policy = RetryPolicy::new(5, std::time::Duration::ZERO);

    let changes = policy
        .run("seed", |_| {
            let store = &store;
            async move {
                let mut b = WriteBatch::new();
                b.create(rfq("a", "b1", 0));
                store.commit(b).await.map_err(TxError::from)
            }
        })
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(store.count(Collection::Rfqs), 1);
}
