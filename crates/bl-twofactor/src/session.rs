use bl_schemas::PrincipalId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One authenticated login of a principal.
///
/// `second_factor_verified` starts `false` and can only be flipped by the
/// gate after a successful confirmation or challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    id: Uuid,
    principal: PrincipalId,
    started_at: DateTime<Utc>,
    second_factor_verified: bool,
}

impl Session {
    /// Fresh login. Always unverified.
    pub fn start(principal: PrincipalId, now: DateTime<Utc>) -> Self {
        Self::with_id(Uuid::new_v4(), principal, now)
    }

    pub fn with_id(id: Uuid, principal: PrincipalId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            principal,
            started_at: now,
            second_factor_verified: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_second_factor_verified(&self) -> bool {
        self.second_factor_verified
    }

    pub(crate) fn mark_second_factor_verified(&mut self) {
        self.second_factor_verified = true;
    }
}
