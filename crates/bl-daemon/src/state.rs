//! Shared runtime state for bl-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The services inside
//! are cheap to clone; the session registry is the only mutable piece and
//! its lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bl_audit::MemoryEventSink;
use bl_award::AwardCoordinator;
use bl_config::{DaemonSettings, ProcureSettings};
use bl_logistics::ShipmentTracker;
use bl_market::{BidLedger, RfqRegistry};
use bl_schemas::{Clock, EventSink, PrincipalId, SystemClock};
use bl_store::{MemStore, RetryPolicy, ServiceDeps, Store};
use bl_twofactor::{Session, Totp, TwoFactorGate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced on
/// `GET /v1/stream`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Event { name: String, params: Value },
}

/// Forwards every service event to the durable sink and onto the bus.
pub struct BusEventSink {
    bus: broadcast::Sender<BusMsg>,
    inner: Arc<dyn EventSink>,
}

impl BusEventSink {
    pub fn new(bus: broadcast::Sender<BusMsg>, inner: Arc<dyn EventSink>) -> Self {
        Self { bus, inner }
    }
}

impl EventSink for BusEventSink {
    fn log_event(&self, name: &str, params: Value) {
        self.inner.log_event(name, params.clone());
        // No subscribers is fine.
        let _ = self.bus.send(BusMsg::Event {
            name: name.to_string(),
            params,
        });
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Second-factor state per session id.
///
/// Session ids come from the fronting authentication layer. The first
/// request under an id creates a fresh, unverified [`Session`] for the
/// principal presenting it; a later request presenting the same id for a
/// different principal is refused.
///
/// An id left idle for longer than the TTL starts over unverified, and idle
/// entries are pruned whenever a new id is admitted.
pub struct SessionRegistry {
    ttl: chrono::Duration,
    sessions: Mutex<HashMap<String, Tracked>>,
}

struct Tracked {
    session: Session,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMismatch;

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DaemonSettings::default().session_ttl())
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(idle_ttl).unwrap_or(chrono::Duration::MAX),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        match self.sessions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_idle(&self, tracked: &Tracked, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(tracked.last_seen) > self.ttl
    }

    pub fn resolve(
        &self,
        session_id: &str,
        principal: &PrincipalId,
        clock: &dyn Clock,
    ) -> Result<Session, SessionMismatch> {
        let now = clock.now();
        let mut map = self.lock();

        let expired = map
            .get(session_id)
            .map(|t| self.is_idle(t, now))
            .unwrap_or(true);
        if expired {
            if map.remove(session_id).is_some() {
                debug!(session_id, "idle session restarted");
            }
            map.retain(|_, t| !self.is_idle(t, now));
        }

        let tracked = map
            .entry(session_id.to_string())
            .or_insert_with(|| Tracked {
                session: Session::start(principal.clone(), now),
                last_seen: now,
            });
        if tracked.session.principal() != principal {
            return Err(SessionMismatch);
        }
        tracked.last_seen = now;
        Ok(tracked.session.clone())
    }

    /// Persist a session after the gate changed it.
    pub fn save(&self, session_id: &str, session: Session, clock: &dyn Clock) {
        self.lock().insert(
            session_id.to_string(),
            Tracked {
                session,
                last_seen: clock.now(),
            },
        );
    }

    /// Forget a session id. The next request under it starts unverified.
    pub fn end(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub build: BuildInfo,
    pub bus: broadcast::Sender<BusMsg>,
    pub clock: Arc<dyn Clock>,
    pub rfqs: RfqRegistry,
    pub bids: BidLedger,
    pub awards: AwardCoordinator,
    pub shipments: ShipmentTracker,
    pub gate: Arc<TwoFactorGate>,
    pub sessions: SessionRegistry,
    /// SSE keep-alive interval.
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn EventSink>,
        settings: &ProcureSettings,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let events: Arc<dyn EventSink> = Arc::new(BusEventSink::new(bus.clone(), audit));
        let retry = RetryPolicy::new(settings.retry.max_attempts, settings.retry.backoff());
        let deps = ServiceDeps::new(store, clock.clone(), events, retry);

        let tf = &settings.two_factor;
        let gate = Arc::new(TwoFactorGate::new(
            deps.clone(),
            Totp::new(tf.step_secs, tf.digits, tf.skew_steps),
            tf.issuer.clone(),
        ));

        Self {
            build: BuildInfo {
                service: "bl-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            bus,
            clock,
            rfqs: RfqRegistry::new(deps.clone()),
            bids: BidLedger::new(deps.clone()),
            awards: AwardCoordinator::new(deps.clone(), gate.clone()),
            // Address validation is an external service; none is wired by default.
            shipments: ShipmentTracker::new(deps, gate.clone(), None),
            gate,
            sessions: SessionRegistry::new(settings.daemon.session_ttl()),
            heartbeat: Duration::from_secs(settings.daemon.heartbeat_secs.max(1)),
        }
    }

    /// Memory store, system clock, events kept in memory only.
    pub fn in_memory() -> Self {
        let settings = ProcureSettings::default();
        Self::new(
            Arc::new(MemStore::with_change_buffer(settings.store.change_buffer)),
            Arc::new(SystemClock),
            Arc::new(MemoryEventSink::new()),
            &settings,
        )
    }
}

/// Spawn a background task that emits a heartbeat on the bus every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
