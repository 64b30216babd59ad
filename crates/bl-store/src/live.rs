//! Live queries.
//!
//! A [`LiveQuery`] is a restartable description of a list; each call to
//! [`LiveQuery::subscribe`] opens an independent snapshot stream:
//!
//! 1. the current list, immediately;
//! 2. a fresh list after every committed change to the query's collection;
//! 3. a forced re-read after the change feed lags or reconnects;
//! 4. one re-read after [`READ_RETRY_BACKOFF`] when a read fails, without
//!    waiting for another commit.
//!
//! A snapshot equal to the one delivered before it is suppressed, so a
//! resync only replays state the consumer has not seen. Dropping the stream
//! drops its change-feed receiver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bl_schemas::{Bid, LogisticsProfile, PrincipalId, Rfq, Shipment};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::{
    BidQuery, Change, Collection, RfqQuery, ShipmentQuery, Store, StoreResult, Versioned,
};

pub type SnapshotStream<T> = BoxStream<'static, StoreResult<Vec<T>>>;

/// Pause before re-reading after a failed read.
pub const READ_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Something a live query can re-run on demand.
#[async_trait]
pub trait LiveSource: Clone + Send + Sync + 'static {
    type Item: Clone + PartialEq + Send + Sync + 'static;

    fn collection(&self) -> Collection;
    async fn fetch(&self, store: &dyn Store) -> StoreResult<Vec<Self::Item>>;
}

#[async_trait]
impl LiveSource for RfqQuery {
    type Item = Rfq;

    fn collection(&self) -> Collection {
        Collection::Rfqs
    }

    async fn fetch(&self, store: &dyn Store) -> StoreResult<Vec<Rfq>> {
        Ok(values(store.query_rfqs(self).await?))
    }
}

#[async_trait]
impl LiveSource for BidQuery {
    type Item = Bid;

    fn collection(&self) -> Collection {
        Collection::Bids
    }

    async fn fetch(&self, store: &dyn Store) -> StoreResult<Vec<Bid>> {
        Ok(values(store.query_bids(self).await?))
    }
}

#[async_trait]
impl LiveSource for ShipmentQuery {
    type Item = Shipment;

    fn collection(&self) -> Collection {
        Collection::Shipments
    }

    async fn fetch(&self, store: &dyn Store) -> StoreResult<Vec<Shipment>> {
        Ok(values(store.query_shipments(self).await?))
    }
}

/// A single supplier's logistics profile, as a zero-or-one element list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileQuery(pub PrincipalId);

#[async_trait]
impl LiveSource for ProfileQuery {
    type Item = LogisticsProfile;

    fn collection(&self) -> Collection {
        Collection::LogisticsProfiles
    }

    async fn fetch(&self, store: &dyn Store) -> StoreResult<Vec<LogisticsProfile>> {
        Ok(store
            .get_profile(&self.0)
            .await?
            .map(Versioned::into_value)
            .into_iter()
            .collect())
    }
}

fn values<T>(rows: Vec<Versioned<T>>) -> Vec<T> {
    rows.into_iter().map(Versioned::into_value).collect()
}

#[derive(Clone)]
pub struct LiveQuery<Q> {
    store: Arc<dyn Store>,
    query: Q,
}

impl<Q: LiveSource> LiveQuery<Q> {
    pub fn new(store: Arc<dyn Store>, query: Q) -> Self {
        Self { store, query }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    /// One-shot read of the current list.
    pub async fn snapshot(&self) -> StoreResult<Vec<Q::Item>> {
        self.query.fetch(self.store.as_ref()).await
    }

    pub fn subscribe(&self) -> SnapshotStream<Q::Item> {
        let cursor = Cursor {
            // Subscribe before the first read so no commit falls in between.
            rx: self.store.subscribe_changes(),
            store: Arc::clone(&self.store),
            query: self.query.clone(),
            last: None,
            primed: false,
            retry_read: false,
            retried: false,
        };
        stream::unfold(cursor, |mut cur| async move {
            loop {
                if cur.retry_read {
                    cur.retry_read = false;
                    tokio::time::sleep(READ_RETRY_BACKOFF).await;
                    drain(&mut cur.rx);
                } else if cur.primed {
                    match cur.rx.recv().await {
                        Ok(change) if !change.touches(cur.query.collection()) => continue,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "live query lagged behind change feed; re-reading");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                    drain(&mut cur.rx);
                    cur.retried = false;
                }
                cur.primed = true;

                match cur.query.fetch(cur.store.as_ref()).await {
                    Ok(items) => {
                        cur.retried = false;
                        if cur.last.as_ref() == Some(&items) {
                            continue;
                        }
                        cur.last = Some(items.clone());
                        return Some((Ok(items), cur));
                    }
                    Err(e) => {
                        // One re-read per failure; after that, wait for a commit.
                        let retrying = !cur.retried;
                        cur.retried = true;
                        cur.retry_read = retrying;
                        cur.last = None;
                        warn!(error = %e, retrying, "live query read failed");
                        return Some((Err(e), cur));
                    }
                }
            }
        })
        .boxed()
    }
}

struct Cursor<Q: LiveSource> {
    store: Arc<dyn Store>,
    query: Q,
    rx: broadcast::Receiver<Change>,
    last: Option<Vec<Q::Item>>,
    primed: bool,
    retry_read: bool,
    retried: bool,
}

/// Coalesce a burst of pending changes into the re-read about to happen.
fn drain(rx: &mut broadcast::Receiver<Change>) {
    loop {
        match rx.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
