//! In-process record store.
//!
//! One mutex guards all tables. It is taken and released inside each call and
//! never held across an `.await`; each call first yields to the scheduler so
//! that concurrent callers interleave the way they would against a remote
//! store.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bl_schemas::{
    Bid, BidId, LogisticsProfile, PrincipalId, Rfq, RfqId, SecondFactorRecord, Shipment,
    ShipmentId,
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    BidQuery, BidRepository, Change, ChangeFeed, Collection, Entity, Expect,
    ProfileRepository, Record, RfqQuery, RfqRepository, SecondFactorRepository, ShipmentQuery,
    ShipmentRepository, StoreError, StoreResult, Transactional, Versioned, WriteBatch,
};

pub const DEFAULT_CHANGE_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<(Collection, String), (u64, Record)>,
}

#[derive(Debug)]
pub struct MemStore {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<Change>,
    injected_contention: AtomicU32,
    injected_read_failures: AtomicU32,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_change_buffer(DEFAULT_CHANGE_BUFFER)
    }

    pub fn with_change_buffer(capacity: usize) -> Self {
        let (changes, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tables: Mutex::new(Tables::default()),
            changes,
            injected_contention: AtomicU32::new(0),
            injected_read_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` commits with [`StoreError::Contention`] without
    /// applying them. Test hook for retry paths.
    pub fn inject_contention(&self, n: u32) {
        self.injected_contention.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` reads with [`StoreError::Backend`]. Test hook for
    /// transient backend outages.
    pub fn inject_read_failure(&self, n: u32) {
        self.injected_read_failures.store(n, Ordering::SeqCst);
    }

    /// Live change-feed receivers, one per open subscription.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Number of records currently held in `collection`.
    pub fn count(&self, collection: Collection) -> usize {
        self.lock()
            .map(|t| t.records.keys().filter(|(c, _)| *c == collection).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".to_string()))
    }

    async fn get<T: Entity>(&self, key: &str) -> StoreResult<Option<Versioned<T>>> {
        tokio::task::yield_now().await;
        self.check_injected_read_failure()?;
        let tables = self.lock()?;
        Ok(tables
            .records
            .get(&(T::COLLECTION, key.to_string()))
            .and_then(|(version, record)| {
                T::from_record(record.clone()).map(|value| Versioned {
                    value,
                    version: *version,
                })
            }))
    }

    async fn scan<T: Entity>(&self, keep: impl Fn(&T) -> bool) -> StoreResult<Vec<Versioned<T>>> {
        tokio::task::yield_now().await;
        self.check_injected_read_failure()?;
        let mut out: Vec<Versioned<T>> = {
            let tables = self.lock()?;
            tables
                .records
                .iter()
                .filter(|((c, _), _)| *c == T::COLLECTION)
                .filter_map(|(_, (version, record))| {
                    T::from_record(record.clone()).map(|value| Versioned {
                        value,
                        version: *version,
                    })
                })
                .filter(|v| keep(&v.value))
                .collect()
        };
        out.sort_by(newest_first);
        Ok(out)
    }

    fn check_injected_read_failure(&self) -> StoreResult<()> {
        let injected = self
            .injected_read_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Backend("injected read failure".to_string()));
        }
        Ok(())
    }

    fn take_injected_contention(&self) -> bool {
        self.injected_contention
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub(crate) fn newest_first<T: Entity>(a: &Versioned<T>, b: &Versioned<T>) -> CmpOrdering {
    b.value
        .created_at()
        .cmp(&a.value.created_at())
        .then_with(|| a.value.key().cmp(&b.value.key()))
}

#[async_trait]
impl RfqRepository for MemStore {
    async fn get_rfq(&self, id: &RfqId) -> StoreResult<Option<Versioned<Rfq>>> {
        self.get(id.as_str()).await
    }

    async fn query_rfqs(&self, query: &RfqQuery) -> StoreResult<Vec<Versioned<Rfq>>> {
        self.scan(|r: &Rfq| query.matches(r)).await
    }
}

#[async_trait]
impl BidRepository for MemStore {
    async fn get_bid(&self, id: &BidId) -> StoreResult<Option<Versioned<Bid>>> {
        self.get(id.as_str()).await
    }

    async fn query_bids(&self, query: &BidQuery) -> StoreResult<Vec<Versioned<Bid>>> {
        self.scan(|b: &Bid| query.matches(b)).await
    }
}

#[async_trait]
impl ShipmentRepository for MemStore {
    async fn get_shipment(&self, id: &ShipmentId) -> StoreResult<Option<Versioned<Shipment>>> {
        self.get(id.as_str()).await
    }

    async fn query_shipments(
        &self,
        query: &ShipmentQuery,
    ) -> StoreResult<Vec<Versioned<Shipment>>> {
        self.scan(|s: &Shipment| query.matches(s)).await
    }
}

#[async_trait]
impl ProfileRepository for MemStore {
    async fn get_profile(
        &self,
        supplier: &PrincipalId,
    ) -> StoreResult<Option<Versioned<LogisticsProfile>>> {
        self.get(supplier.as_str()).await
    }
}

#[async_trait]
impl SecondFactorRepository for MemStore {
    async fn get_second_factor(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<Option<Versioned<SecondFactorRecord>>> {
        self.get(principal.as_str()).await
    }
}

#[async_trait]
impl Transactional for MemStore {
    async fn commit(&self, batch: WriteBatch) -> StoreResult<Vec<Change>> {
        tokio::task::yield_now().await;

        if let Some((collection, id)) = batch.duplicate_key() {
            return Err(StoreError::Backend(format!(
                "batch writes {}/{} twice",
                collection.as_str(),
                id
            )));
        }

        let changes = {
            let mut tables = self.lock()?;

            if self.take_injected_contention() {
                let first = batch.mutations().first();
                return Err(StoreError::Contention {
                    collection: first
                        .map(|m| m.record.collection().as_str())
                        .unwrap_or("batch"),
                    id: first.map(|m| m.record.key()).unwrap_or_default(),
                    detail: "injected".to_string(),
                });
            }

            // Validate every expectation before touching anything.
            for m in batch.mutations() {
                let key = (m.record.collection(), m.record.key());
                let current = tables.records.get(&key).map(|(v, _)| *v);
                let ok = match (m.expect, current) {
                    (Expect::Absent, None) => true,
                    (Expect::Version(want), Some(have)) => want == have,
                    _ => false,
                };
                if !ok {
                    return Err(StoreError::Contention {
                        collection: key.0.as_str(),
                        id: key.1,
                        detail: format!("expected {:?}, found {:?}", m.expect, current),
                    });
                }
            }

            let mut changes = Vec::with_capacity(batch.len());
            for m in batch.into_mutations() {
                let collection = m.record.collection();
                let id = m.record.key();
                let version = match m.expect {
                    Expect::Absent => 1,
                    Expect::Version(v) => v + 1,
                };
                tables
                    .records
                    .insert((collection, id.clone()), (version, m.record));
                changes.push(Change::Record {
                    collection,
                    id,
                    version,
                });
            }
            changes
        };

        debug!(records = changes.len(), "memstore commit");
        for c in &changes {
            // No receivers is fine.
            let _ = self.changes.send(c.clone());
        }
        Ok(changes)
    }
}

impl ChangeFeed for MemStore {
    fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }
}
