use std::future::Future;
use std::time::Duration;

use bl_schemas::ProcureError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::StoreError;

/// Failure of one attempt at a read-validate-commit unit of work.
#[derive(Debug, Error)]
pub enum TxError {
    #[error(transparent)]
    Domain(#[from] ProcureError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bounded retry for optimistic units of work.
///
/// Only [`StoreError::Contention`] is retried: the attempt re-reads
/// everything it depends on. Domain errors and backend failures are
/// returned at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, ProcureError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TxError>>,
    {
        let max = self.max_attempts.max(1);
        let mut last_contention = String::new();
        for n in 1..=max {
            match attempt(n).await {
                Ok(v) => {
                    if n > 1 {
                        debug!(operation, attempt = n, "committed after retry");
                    }
                    return Ok(v);
                }
                Err(TxError::Domain(e)) => return Err(e),
                Err(TxError::Store(StoreError::Contention { collection, id, detail })) => {
                    warn!(operation, attempt = n, collection, id = %id, "write contention");
                    last_contention = format!("{collection}/{id}: {detail}");
                    if n < max && !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * n).await;
                    }
                }
                Err(TxError::Store(other)) => {
                    return Err(ProcureError::Unavailable(other.to_string()));
                }
            }
        }
        Err(ProcureError::Consistency {
            operation,
            attempts: max,
            reason: last_contention,
        })
    }
}
