use async_trait::async_trait;
use bl_schemas::{
    Bid, BidId, LogisticsProfile, PrincipalId, Rfq, RfqId, SecondFactorRecord, Shipment,
    ShipmentId,
};
use bl_store::{
    BidQuery, BidRepository, Change, ChangeFeed, Collection, Entity, Expect, ProfileRepository,
    Record, RfqQuery, RfqRepository, SecondFactorRepository, ShipmentQuery, ShipmentRepository,
    StoreError, StoreResult, Transactional, Versioned, WriteBatch,
};
use serde_json::json;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use tracing::debug;

use crate::feed::CHANGE_CHANNEL;

/// Record store over the `records` table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<Change>,
}

impl PgStore {
    /// Wrap a migrated pool. Call [`crate::spawn_change_listener`] with
    /// [`PgStore::change_sender`] to feed live queries.
    pub fn new(pool: PgPool, change_buffer: usize) -> Self {
        let (changes, _rx) = broadcast::channel(change_buffer.max(1));
        Self { pool, changes }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn change_sender(&self) -> broadcast::Sender<Change> {
        self.changes.clone()
    }

    async fn get<T: Entity>(&self, key: &str) -> StoreResult<Option<Versioned<T>>> {
        let row = sqlx::query("select version, doc from records where collection = $1 and id = $2")
            .bind(T::COLLECTION.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| decode::<T>(&r)).transpose()
    }

    /// Rows of `T` whose top-level document `field` equals `value`.
    async fn select_where<T: Entity>(
        &self,
        field: &'static str,
        value: &str,
    ) -> StoreResult<Vec<Versioned<T>>> {
        let sql = format!(
            "select version, doc from records \
             where collection = $1 and doc->>'{field}' = $2 \
             order by created_at desc, id asc"
        );
        let rows = sqlx::query(&sql)
            .bind(T::COLLECTION.as_str())
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(decode::<T>).collect()
    }
}

fn decode<T: Entity>(row: &sqlx::postgres::PgRow) -> StoreResult<Versioned<T>> {
    let version: i64 = row.try_get("version").map_err(backend)?;
    let doc: serde_json::Value = row.try_get("doc").map_err(backend)?;
    let record = Record::from_json(T::COLLECTION, doc)?;
    let value = T::from_record(record).ok_or_else(|| {
        StoreError::Serialization(format!("record is not a {}", T::COLLECTION.as_str()))
    })?;
    let version = u64::try_from(version)
        .map_err(|_| StoreError::Serialization(format!("negative version {version}")))?;
    Ok(Versioned { value, version })
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Serialization failures and deadlocks are lost races, not outages.
fn classify(e: sqlx::Error, collection: Collection, id: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01") | Some("23505")) {
            return StoreError::Contention {
                collection: collection.as_str(),
                id: id.to_string(),
                detail: db.message().to_string(),
            };
        }
    }
    backend(e)
}

#[async_trait]
impl RfqRepository for PgStore {
    async fn get_rfq(&self, id: &RfqId) -> StoreResult<Option<Versioned<Rfq>>> {
        self.get(id.as_str()).await
    }

    async fn query_rfqs(&self, query: &RfqQuery) -> StoreResult<Vec<Versioned<Rfq>>> {
        match query {
            RfqQuery::ByBuyer(b) => self.select_where("buyer_id", b.as_str()).await,
            RfqQuery::Open => self.select_where("status", "open").await,
        }
    }
}

#[async_trait]
impl BidRepository for PgStore {
    async fn get_bid(&self, id: &BidId) -> StoreResult<Option<Versioned<Bid>>> {
        self.get(id.as_str()).await
    }

    async fn query_bids(&self, query: &BidQuery) -> StoreResult<Vec<Versioned<Bid>>> {
        match query {
            BidQuery::ForRfq(r) => self.select_where("rfq_id", r.as_str()).await,
            BidQuery::ForSupplier(s) => self.select_where("supplier_id", s.as_str()).await,
        }
    }
}

#[async_trait]
impl ShipmentRepository for PgStore {
    async fn get_shipment(&self, id: &ShipmentId) -> StoreResult<Option<Versioned<Shipment>>> {
        self.get(id.as_str()).await
    }

    async fn query_shipments(
        &self,
        query: &ShipmentQuery,
    ) -> StoreResult<Vec<Versioned<Shipment>>> {
        match query {
            ShipmentQuery::ForBuyer(p) => self.select_where("buyer_id", p.as_str()).await,
            ShipmentQuery::ForSupplier(p) => self.select_where("supplier_id", p.as_str()).await,
            ShipmentQuery::ForRfq(r) => self.select_where("rfq_id", r.as_str()).await,
        }
    }
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn get_profile(
        &self,
        supplier: &PrincipalId,
    ) -> StoreResult<Option<Versioned<LogisticsProfile>>> {
        self.get(supplier.as_str()).await
    }
}

#[async_trait]
impl SecondFactorRepository for PgStore {
    async fn get_second_factor(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<Option<Versioned<SecondFactorRecord>>> {
        self.get(principal.as_str()).await
    }
}

#[async_trait]
impl Transactional for PgStore {
    async fn commit(&self, batch: WriteBatch) -> StoreResult<Vec<Change>> {
        if let Some((collection, id)) = batch.duplicate_key() {
            return Err(StoreError::Backend(format!(
                "batch writes {}/{} twice",
                collection.as_str(),
                id
            )));
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut changes = Vec::with_capacity(batch.len());

        for m in batch.into_mutations() {
            let collection = m.record.collection();
            let id = m.record.key();
            let created_at = m.record.created_at();
            let doc = m.record.to_json()?;

            let (affected, version) = match m.expect {
                Expect::Absent => {
                    let res = sqlx::query(
                        r#"
                        insert into records (collection, id, version, created_at, updated_at, doc)
                        values ($1, $2, 1, $3, now(), $4)
                        on conflict (collection, id) do nothing
                        "#,
                    )
                    .bind(collection.as_str())
                    .bind(&id)
                    .bind(created_at)
                    .bind(&doc)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify(e, collection, &id))?;
                    (res.rows_affected(), 1u64)
                }
                Expect::Version(expected) => {
                    let expected_i = i64::try_from(expected).map_err(|_| {
                        StoreError::Serialization(format!("version {expected} out of range"))
                    })?;
                    let res = sqlx::query(
                        r#"
                        update records
                           set version = version + 1, doc = $3, updated_at = now()
                         where collection = $1 and id = $2 and version = $4
                        "#,
                    )
                    .bind(collection.as_str())
                    .bind(&id)
                    .bind(&doc)
                    .bind(expected_i)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify(e, collection, &id))?;
                    (res.rows_affected(), expected + 1)
                }
            };

            if affected != 1 {
                // Dropping `tx` rolls back everything written so far.
                return Err(StoreError::Contention {
                    collection: collection.as_str(),
                    id,
                    detail: format!("expected {:?}", m.expect),
                });
            }

            let payload = json!({
                "collection": collection.as_str(),
                "id": id,
                "version": version,
            })
            .to_string();
            sqlx::query("select pg_notify($1, $2)")
                .bind(CHANGE_CHANNEL)
                .bind(&payload)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;

            changes.push(Change::Record {
                collection,
                id,
                version,
            });
        }

        tx.commit()
            .await
            .map_err(|e| match changes.first() {
                Some(Change::Record { collection, id, .. }) => classify(e, *collection, id),
                _ => backend(e),
            })?;
        debug!(records = changes.len(), "pg commit");
        Ok(changes)
    }
}

impl ChangeFeed for PgStore {
    fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }
}
