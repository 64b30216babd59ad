//! Ports for collaborators outside this workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProcureResult;

/// Fire-and-forget analytics/audit event logging.
///
/// Implementations must not fail the caller; a sink that cannot record an
/// event reports it through tracing and drops it.
pub trait EventSink: Send + Sync {
    fn log_event(&self, name: &str, params: Value);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn log_event(&self, _name: &str, _params: Value) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCheck {
    pub is_valid: bool,
    pub validated_address: Option<String>,
}

/// Address validation/geocoding service.
#[async_trait]
pub trait AddressValidator: Send + Sync {
    async fn validate(&self, address: &str) -> ProcureResult<AddressCheck>;
}
