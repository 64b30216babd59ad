use std::sync::Arc;

use bl_schemas::{Clock, EventSink};

use crate::{RetryPolicy, Store};

/// Collaborators every procurement service is built from.
#[derive(Clone)]
pub struct ServiceDeps {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub retry: RetryPolicy,
}

impl ServiceDeps {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            retry,
        }
    }
}
