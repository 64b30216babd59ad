use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PrincipalId;

/// Persisted second-factor state for one principal.
///
/// `secret` is base32 and is only present while enrolling or enrolled.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondFactorRecord {
    pub principal: PrincipalId,
    pub secret: Option<String>,
    pub enabled: bool,
    /// Last accepted TOTP time step; codes at or before it are replays.
    pub last_used_step: Option<u64>,
    pub enrolled_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Secret stays out of logs.
impl std::fmt::Debug for SecondFactorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondFactorRecord")
            .field("principal", &self.principal)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("enabled", &self.enabled)
            .field("last_used_step", &self.last_used_step)
            .field("enrolled_at", &self.enrolled_at)
            .field("disabled_at", &self.disabled_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactorStatus {
    Unenrolled,
    Enrolling,
    Enrolled,
}

impl SecondFactorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unenrolled => "unenrolled",
            Self::Enrolling => "enrolling",
            Self::Enrolled => "enrolled",
        }
    }
}

impl SecondFactorRecord {
    pub fn status(&self) -> SecondFactorStatus {
        match (&self.secret, self.enabled) {
            (Some(_), true) => SecondFactorStatus::Enrolled,
            (Some(_), false) => SecondFactorStatus::Enrolling,
            (None, _) => SecondFactorStatus::Unenrolled,
        }
    }
}
