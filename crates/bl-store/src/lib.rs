//! bl-store
//!
//! The Record Store: the only shared mutable resource in the system.
//!
//! - Reads go through per-entity repository traits.
//! - Writes go through [`Transactional::commit`] only. A [`WriteBatch`] is a
//!   set of conditional puts (create-if-absent or compare-and-swap on the
//!   record version) applied all-or-nothing.
//! - Every commit is announced on the [`ChangeFeed`]; [`LiveQuery`] turns that
//!   into restartable snapshot streams.
//!
//! No implementation may hold an in-process lock across an `.await`.

mod batch;
mod deps;
mod entity;
mod live;
mod mem;
mod repo;
mod retry;

pub use batch::{Change, Expect, Mutation, WriteBatch};
pub use deps::ServiceDeps;
pub use entity::{Collection, Entity, Record};
pub use live::{LiveQuery, LiveSource, ProfileQuery, SnapshotStream, READ_RETRY_BACKOFF};
pub use mem::MemStore;
pub use repo::{
    BidQuery, BidRepository, ChangeFeed, ProfileRepository, RfqQuery, RfqRepository,
    SecondFactorRepository, ShipmentQuery, ShipmentRepository, Store, Transactional,
};
pub use retry::{RetryPolicy, TxError};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A batch expectation did not hold; nothing was written.
    #[error("write contention on {collection}/{id}: {detail}")]
    Contention {
        collection: &'static str,
        id: String,
        detail: String,
    },
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("record serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

impl From<StoreError> for bl_schemas::ProcureError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Contention { .. } => bl_schemas::ProcureError::Consistency {
                operation: "commit",
                attempts: 1,
                reason: e.to_string(),
            },
            other => bl_schemas::ProcureError::Unavailable(other.to_string()),
        }
    }
}
