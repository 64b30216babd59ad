//! bl-testkit
//!
//! A fully wired in-memory deployment for scenario tests: one [`MemStore`],
//! one [`ManualClock`], one [`MemoryEventSink`] and every service built on
//! top of them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bl_audit::MemoryEventSink;
use bl_award::AwardCoordinator;
use bl_logistics::ShipmentTracker;
use bl_market::{BidLedger, RfqRegistry};
use bl_schemas::{
    AddressValidator, BidDraft, Clock, LineItem, ManualClock, PrincipalId, RfqDetails,
};
use bl_store::{MemStore, RetryPolicy, ServiceDeps};
use bl_twofactor::{Session, Totp, TwoFactorGate};
use chrono::{DateTime, TimeZone, Utc};

pub struct Harness {
    pub store: Arc<MemStore>,
    pub clock: Arc<ManualClock>,
    pub events: Arc<MemoryEventSink>,
    pub deps: ServiceDeps,
    pub rfqs: RfqRegistry,
    pub bids: BidLedger,
    pub gate: Arc<TwoFactorGate>,
    pub awards: AwardCoordinator,
    pub shipments: ShipmentTracker,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(MemStore::new(), RetryPolicy::new(5, Duration::ZERO), None)
    }

    pub fn with_store(store: MemStore, retry: RetryPolicy) -> Self {
        Self::build(store, retry, None)
    }

    pub fn with_address_validator(validator: Arc<dyn AddressValidator>) -> Self {
        Self::build(
            MemStore::new(),
            RetryPolicy::new(5, Duration::ZERO),
            Some(validator),
        )
    }

    fn build(
        store: MemStore,
        retry: RetryPolicy,
        addresses: Option<Arc<dyn AddressValidator>>,
    ) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(epoch()));
        let events = Arc::new(MemoryEventSink::new());
        let deps = ServiceDeps::new(store.clone(), clock.clone(), events.clone(), retry);
        let gate = Arc::new(TwoFactorGate::new(
            deps.clone(),
            Totp::default(),
            "BuildLink",
        ));
        Self {
            rfqs: RfqRegistry::new(deps.clone()),
            bids: BidLedger::new(deps.clone()),
            awards: AwardCoordinator::new(deps.clone(), gate.clone()),
            shipments: ShipmentTracker::new(deps.clone(), gate.clone(), addresses),
            gate,
            store,
            clock,
            events,
            deps,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// A fresh, unverified login.
    pub fn login(&self, who: &str) -> Session {
        Session::start(PrincipalId::new(who), self.now())
    }

    /// Current TOTP code for `secret` at the harness clock.
    pub fn totp_code_for(&self, secret: &str) -> Result<String> {
        totp_code_for(self.gate.totp(), secret, self.now())
    }

    /// Enroll `session`'s principal and return the secret. Leaves the
    /// session verified.
    pub async fn enroll(&self, session: &mut Session) -> Result<String> {
        let payload = self
            .gate
            .begin_enrollment(session)
            .await
            .context("begin enrollment")?;
        let code = self.totp_code_for(&payload.secret)?;
        self.gate
            .confirm_enrollment(session, &code)
            .await
            .context("confirm enrollment")?;
        Ok(payload.secret)
    }
}

pub fn totp_code_for(totp: &Totp, secret: &str, at: DateTime<Utc>) -> Result<String> {
    totp.code_at(secret, at.timestamp())
        .ok_or_else(|| anyhow!("secret is not valid base32"))
}

/// Fixed start of every harness clock.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn details(title: &str, items: &[(&str, i64, &str)], budget: Option<i64>) -> RfqDetails {
    RfqDetails {
        title: title.to_string(),
        description: String::new(),
        due_date: None,
        budget,
        line_items: items
            .iter()
            .map(|(description, quantity, unit)| LineItem {
                description: description.to_string(),
                quantity: *quantity,
                unit: unit.to_string(),
            })
            .collect(),
        delivery_location: None,
    }
}

pub fn bid(amount: i64) -> BidDraft {
    BidDraft {
        amount,
        lead_time: "7 days".to_string(),
        message: String::new(),
        supplier_name: None,
    }
}
