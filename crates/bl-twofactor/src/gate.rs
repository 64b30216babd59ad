use std::sync::Arc;

use async_trait::async_trait;
use bl_schemas::{
    AuthorizationFailure, Clock, EventSink, PrincipalId, ProcureError, ProcureResult,
    SecondFactorRecord, SecondFactorStatus,
};
use bl_store::{RetryPolicy, ServiceDeps, Store, TxError, Versioned, WriteBatch};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::session::Session;
use crate::totp::{self, Totp};

// ---------------------------------------------------------------------------
// Gate trait
// ---------------------------------------------------------------------------

/// Authorization decorator for high-impact operations.
///
/// # Contract
/// Refuses with `AuthorizationFailure::SecondFactorRequired` when the session's
/// principal has an enabled second factor and the session has not passed a
/// challenge. Principals that never enrolled pass.
#[async_trait]
pub trait SecondFactorGate: Send + Sync {
    async fn require_verified(&self, session: &Session) -> ProcureResult<()>;
}

/// Returned once by [`TwoFactorGate::begin_enrollment`]. The secret is not
/// retrievable again through this crate.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentPayload {
    pub secret: String,
    pub otpauth_uri: String,
}

impl std::fmt::Debug for EnrollmentPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnrollmentPayload { .. }")
    }
}

// ---------------------------------------------------------------------------
// TwoFactorGate
// ---------------------------------------------------------------------------

pub struct TwoFactorGate {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    totp: Totp,
    issuer: String,
}

impl TwoFactorGate {
    pub fn new(deps: ServiceDeps, totp: Totp, issuer: impl Into<String>) -> Self {
        Self {
            store: deps.store,
            clock: deps.clock,
            events: deps.events,
            retry: deps.retry,
            totp,
            issuer: issuer.into(),
        }
    }

    pub fn totp(&self) -> &Totp {
        &self.totp
    }

    pub async fn status(&self, principal: &PrincipalId) -> ProcureResult<SecondFactorStatus> {
        Ok(self
            .store
            .get_second_factor(principal)
            .await?
            .map(|r| r.value.status())
            .unwrap_or(SecondFactorStatus::Unenrolled))
    }

    /// Generate and persist a fresh, not-yet-enabled secret. Restarting an
    /// unfinished enrollment replaces its secret.
    pub async fn begin_enrollment(&self, session: &Session) -> ProcureResult<EnrollmentPayload> {
        let principal = session.principal();
        let secret = totp::generate_secret();
        self.retry
            .run("begin_enrollment", |_| {
                let secret = secret.clone();
                async move {
                    let current = self.store.get_second_factor(principal).await?;
                    let now = self.clock.now();
                    if let Some(c) = &current {
                        if c.value.status() == SecondFactorStatus::Enrolled {
                            return Err(conflict(principal, c.value.status(), "already enrolled").into());
                        }
                    }
                    let (record, version) = match current {
                        Some(Versioned { mut value, version }) => {
                            value.secret = Some(secret);
                            value.enabled = false;
                            value.last_used_step = None;
                            value.updated_at = now;
                            (value, Some(version))
                        }
                        None => (
                            SecondFactorRecord {
                                principal: principal.clone(),
                                secret: Some(secret),
                                enabled: false,
                                last_used_step: None,
                                enrolled_at: None,
                                disabled_at: None,
                                created_at: now,
                                updated_at: now,
                            },
                            None,
                        ),
                    };
                    let mut batch = WriteBatch::new();
                    batch.put(record, version);
                    self.store.commit(batch).await?;
                    Ok::<_, TxError>(())
                }
            })
            .await?;

        info!(principal = %principal, "second factor enrollment started");
        Ok(EnrollmentPayload {
            otpauth_uri: totp::provisioning_uri(&self.issuer, principal.as_str(), &secret, &self.totp),
            secret,
        })
    }

    /// Verify the first code, enable the factor and mark the session verified.
    pub async fn confirm_enrollment(&self, session: &mut Session, code: &str) -> ProcureResult<()> {
        self.verify_and_record(session, code, SecondFactorStatus::Enrolling)
            .await?;
        session.mark_second_factor_verified();
        info!(principal = %session.principal(), "second factor enabled");
        self.events.log_event(
            "two_factor_enabled",
            json!({ "principal": session.principal() }),
        );
        Ok(())
    }

    /// Verify a code for an enrolled principal and mark the session verified.
    pub async fn challenge(&self, session: &mut Session, code: &str) -> ProcureResult<()> {
        self.verify_and_record(session, code, SecondFactorStatus::Enrolled)
            .await?;
        session.mark_second_factor_verified();
        info!(principal = %session.principal(), session = %session.id(), "second factor challenge passed");
        Ok(())
    }

    /// Clear the secret and the enabled flag. An enrolled principal must be
    /// in a verified session.
    pub async fn disable(&self, session: &Session) -> ProcureResult<()> {
        let principal = session.principal();
        self.retry
            .run("disable_second_factor", |_| async move {
                let Some(Versioned { mut value, version }) =
                    self.store.get_second_factor(principal).await?
                else {
                    return Err(conflict(principal, SecondFactorStatus::Unenrolled, "not enrolled").into());
                };
                let status = value.status();
                if status == SecondFactorStatus::Unenrolled {
                    return Err(conflict(principal, status, "not enrolled").into());
                }
                if status == SecondFactorStatus::Enrolled && !session.is_second_factor_verified() {
                    return Err(TxError::Domain(ProcureError::second_factor_required()));
                }
                let now = self.clock.now();
                value.secret = None;
                value.enabled = false;
                value.last_used_step = None;
                value.disabled_at = Some(now);
                value.updated_at = now;
                let mut batch = WriteBatch::new();
                batch.update(value, version);
                self.store.commit(batch).await?;
                Ok::<(), TxError>(())
            })
            .await?;

        info!(principal = %principal, "second factor disabled");
        self.events.log_event(
            "two_factor_disabled",
            json!({ "principal": principal }),
        );
        Ok(())
    }

    async fn verify_and_record(
        &self,
        session: &Session,
        code: &str,
        required: SecondFactorStatus,
    ) -> ProcureResult<()> {
        let principal = session.principal();
        self.retry
            .run("verify_second_factor", |_| async move {
                let Some(Versioned { mut value, version }) =
                    self.store.get_second_factor(principal).await?
                else {
                    return Err(conflict(principal, SecondFactorStatus::Unenrolled, "no second factor to verify").into());
                };
                let status = value.status();
                if status != required {
                    return Err(conflict(
                        principal,
                        status,
                        format!("expected {}", required.as_str()),
                    )
                    .into());
                }
                let Some(secret) = value.secret.as_deref() else {
                    return Err(conflict(principal, status, "no secret on record").into());
                };

                let now = self.clock.now();
                let Some(step) =
                    self.totp
                        .verify(secret, code, now.timestamp(), value.last_used_step)
                else {
                    warn!(principal = %principal, "second factor code rejected");
                    return Err(TxError::Domain(ProcureError::Authorization(
                        AuthorizationFailure::InvalidCode,
                    )));
                };

                value.last_used_step = Some(step);
                value.updated_at = now;
                if required == SecondFactorStatus::Enrolling {
                    value.enabled = true;
                    value.enrolled_at = Some(now);
                    value.disabled_at = None;
                }
                let mut batch = WriteBatch::new();
                batch.update(value, version);
                self.store.commit(batch).await?;
                Ok::<(), TxError>(())
            })
            .await
    }
}

#[async_trait]
impl SecondFactorGate for TwoFactorGate {
    async fn require_verified(&self, session: &Session) -> ProcureResult<()> {
        if session.is_second_factor_verified() {
            return Ok(());
        }
        match self.status(session.principal()).await? {
            SecondFactorStatus::Enrolled => Err(ProcureError::second_factor_required()),
            SecondFactorStatus::Unenrolled | SecondFactorStatus::Enrolling => Ok(()),
        }
    }
}

fn conflict(
    principal: &PrincipalId,
    status: SecondFactorStatus,
    reason: impl Into<String>,
) -> ProcureError {
    ProcureError::conflict("second_factor", principal.as_str(), status.as_str(), reason)
}
