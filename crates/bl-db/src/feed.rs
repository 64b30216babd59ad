use std::time::Duration;

use bl_store::{Change, Collection};
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// `LISTEN` channel carrying committed record changes.
pub const CHANGE_CHANNEL: &str = "bl_record_changes";

#[derive(Debug, Deserialize)]
struct Payload {
    collection: String,
    id: String,
    version: u64,
}

fn parse(payload: &str) -> Option<Change> {
    let p: Payload = serde_json::from_str(payload).ok()?;
    Some(Change::Record {
        collection: Collection::parse(&p.collection)?,
        id: p.id,
        version: p.version,
    })
}

/// Forward Postgres notifications into the store's broadcast feed.
///
/// Whenever the listener connection drops, a [`Change::Resync`] is sent
/// so live queries re-read instead of trusting a feed with a gap.
pub fn spawn_change_listener(pool: PgPool, tx: broadcast::Sender<Change>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = Duration::from_millis(250);
        loop {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "change listener connect failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(10));
                    continue;
                }
            };
            if let Err(e) = listener.listen(CHANGE_CHANNEL).await {
                warn!(error = %e, "LISTEN failed");
                tokio::time::sleep(backoff).await;
                continue;
            }
            info!(channel = CHANGE_CHANNEL, "change listener attached");
            backoff = Duration::from_millis(250);
            let _ = tx.send(Change::Resync);

            loop {
                match listener.try_recv().await {
                    Ok(Some(n)) => match parse(n.payload()) {
                        Some(change) => {
                            let _ = tx.send(change);
                        }
                        None => warn!(payload = n.payload(), "unparseable change notification"),
                    },
                    Ok(None) => {
                        warn!("change listener connection lost; resyncing");
                        let _ = tx.send(Change::Resync);
                    }
                    Err(e) => {
                        warn!(error = %e, "change listener failed; reconnecting");
                        let _ = tx.send(Change::Resync);
                        break;
                    }
                }
            }
            tokio::time::sleep(backoff).await;
        }
    })
}
