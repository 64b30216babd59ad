//! Enrollment flips the principal to enrolled only after a valid first code;
//! session verification is per session and resets on a new login; a wrong
//! code changes nothing.

use std::sync::Arc;

use bl_schemas::{
    AuthorizationFailure, ManualClock, NoopEventSink, PrincipalId, ProcureError,
    SecondFactorStatus,
};
use bl_store::{MemStore, RetryPolicy, ServiceDeps, Store};
use bl_twofactor::{SecondFactorGate, Session, Totp, TwoFactorGate};
use chrono::{Duration, TimeZone, Utc};

struct Fixture {
    clock: Arc<ManualClock>,
    gate: TwoFactorGate,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
    ));
    let store: Arc<dyn Store> = Arc::new(MemStore::new());
    let deps = ServiceDeps::new(
        store,
        clock.clone(),
        Arc::new(NoopEventSink),
        RetryPolicy::new(3, std::time::Duration::ZERO),
    );
    let gate = TwoFactorGate::new(deps, Totp::default(), "BuildLink");
    Fixture { clock, gate }
}

impl Fixture {
    fn code(&self, secret: &str) -> String {
        self.gate
            .totp()
            .code_at(secret, bl_schemas::Clock::now(self.clock.as_ref()).timestamp())
            .unwrap()
    }

    fn login(&self, who: &str) -> Session {
        Session::start(PrincipalId::new(who), bl_schemas::Clock::now(self.clock.as_ref()))
    }
}

#[tokio::test]
async fn unenrolled_principal_passes_the_gate() {
    let f = fixture();
    let session = f.login("buyer");
    f.gate.require_verified(&session).await.unwrap();
    assert_eq!(
        f.gate.status(session.principal()).await.unwrap(),
        SecondFactorStatus::Unenrolled
    );
}

#[tokio::test]
async fn enrollment_requires_valid_code_and_verifies_session() {
    let f = fixture();
    let mut session = f.login("buyer");
    let payload = f.gate.begin_enrollment(&session).await.unwrap();
    assert!(payload.otpauth_uri.contains("BuildLink:buyer"));
    assert_eq!(
        f.gate.status(session.principal()).await.unwrap(),
        SecondFactorStatus::Enrolling
    );
    // Enrolling but not enabled: gate still passes.
    f.gate.require_verified(&session).await.unwrap();

    let err = f
        .gate
        .confirm_enrollment(&mut session, "abcdef")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcureError::Authorization(AuthorizationFailure::InvalidCode)
    ));
    assert!(!session.is_second_factor_verified());
    assert_eq!(
        f.gate.status(session.principal()).await.unwrap(),
        SecondFactorStatus::Enrolling
    );

    let code = f.code(&payload.secret);
    f.gate.confirm_enrollment(&mut session, &code).await.unwrap();
    assert!(session.is_second_factor_verified());
    assert_eq!(
        f.gate.status(session.principal()).await.unwrap(),
        SecondFactorStatus::Enrolled
    );
    f.gate.require_verified(&session).await.unwrap();
}

#[tokio::test]
async fn new_session_must_pass_challenge() {
    let f = fixture();
    let mut first = f.login("buyer");
    let payload = f.gate.begin_enrollment(&first).await.unwrap();
    let code = f.code(&payload.secret);
    f.gate.confirm_enrollment(&mut first, &code).await.unwrap();

    let mut second = f.login("buyer");
    let err = f.gate.require_verified(&second).await.unwrap_err();
    assert_eq!(err, ProcureError::second_factor_required());

    // The code used for confirmation cannot be replayed.
    let replay = f.gate.challenge(&mut second, &code).await.unwrap_err();
    assert!(matches!(
        replay,
        ProcureError::Authorization(AuthorizationFailure::InvalidCode)
    ));

    f.clock.advance(Duration::seconds(30));
    let fresh = f.code(&payload.secret);
    f.gate.challenge(&mut second, &fresh).await.unwrap();
    f.gate.require_verified(&second).await.unwrap();
    // The first session stays verified.
    f.gate.require_verified(&first).await.unwrap();
}

#[tokio::test]
async fn enrolled_principal_cannot_restart_enrollment() {
    let f = fixture();
    let mut s = f.login("supplier");
    let payload = f.gate.begin_enrollment(&s).await.unwrap();
    let code = f.code(&payload.secret);
    f.gate.confirm_enrollment(&mut s, &code).await.unwrap();

    let err = f.gate.begin_enrollment(&s).await.unwrap_err();
    assert!(matches!(err, ProcureError::Conflict { .. }));
}

#[tokio::test]
async fn disable_needs_verified_session_and_clears_factor() {
    let f = fixture();
    let mut s = f.login("buyer");
    let payload = f.gate.begin_enrollment(&s).await.unwrap();
    let code = f.code(&payload.secret);
    f.gate.confirm_enrollment(&mut s, &code).await.unwrap();

    let unverified = f.login("buyer");
    assert_eq!(
        f.gate.disable(&unverified).await.unwrap_err(),
        ProcureError::second_factor_required()
    );

    f.gate.disable(&s).await.unwrap();
    assert_eq!(
        f.gate.status(s.principal()).await.unwrap(),
        SecondFactorStatus::Unenrolled
    );
    f.gate.require_verified(&unverified).await.unwrap();

    let err = f.gate.disable(&s).await.unwrap_err();
    assert!(matches!(err, ProcureError::Conflict { .. }));
}

#[tokio::test]
async fn challenge_without_enrollment_is_conflict() {
    let f = fixture();
    let mut s = f.login("nobody");
    let err = f.gate.challenge(&mut s, "123456").await.unwrap_err();
    assert!(matches!(err, ProcureError::Conflict { .. }));
    assert!(!s.is_second_factor_verified());
}
