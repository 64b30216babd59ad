//! bl-db
//!
//! PostgreSQL record store.
//!
//! All collections live in one `records` table keyed by `(collection, id)`
//! with a JSONB document and a version counter. A write batch runs in one SQL
//! transaction:
//!
//! - create: `insert … on conflict do nothing` and require one row;
//! - update: `update … where version = $expected` and require one row.
//!
//! Any miss aborts the transaction and surfaces as
//! [`bl_store::StoreError::Contention`]. Change notifications are issued with
//! `pg_notify` inside the same transaction, so listeners only hear about
//! committed state.

mod feed;
mod store;

pub use feed::{spawn_change_listener, CHANGE_CHANNEL};
pub use store::PgStore;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "BL_DATABASE_URL";

/// Connect to Postgres using BL_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_records_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'records'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_records_table: exists,
    })
}

/// Per-collection record counts, for operator status output.
pub async fn collection_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "select collection, count(*)::bigint from records group by collection order by collection",
    )
    .fetch_all(pool)
    .await
    .context("collection count query failed")?;
    Ok(rows)
}
