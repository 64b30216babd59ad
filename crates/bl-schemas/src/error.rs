use thiserror::Error;

pub type ProcureResult<T> = Result<T, ProcureError>;

/// Why an authorization check refused the caller.
///
/// `SecondFactorRequired` is kept apart from the other reasons so that
/// front ends can route the caller into a challenge flow instead of showing
/// a generic failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationFailure {
    #[error("second factor required for this session")]
    SecondFactorRequired,
    #[error("invalid one-time code")]
    InvalidCode,
    #[error("{0}")]
    NotPermitted(String),
}

/// Error taxonomy for every procurement operation.
///
/// All variants except an exhausted `Consistency` are recoverable by the
/// caller (fix input, refresh and retry, re-authenticate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcureError {
    /// Malformed or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation inconsistent with the entity's current state. `state` is
    /// the state observed so the caller can refresh.
    #[error("{entity} {id} is {state}: {reason}")]
    Conflict {
        entity: &'static str,
        id: String,
        state: String,
        reason: String,
    },

    #[error("not authorized: {0}")]
    Authorization(AuthorizationFailure),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A multi-record unit of work could not be committed within the bounded
    /// number of attempts. Nothing was applied.
    #[error("{operation} could not be committed after {attempts} attempts: {reason}")]
    Consistency {
        operation: &'static str,
        attempts: u32,
        reason: String,
    },

    /// The record store or an external collaborator failed transiently.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ProcureError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(
        entity: &'static str,
        id: impl Into<String>,
        state: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity,
            id: id.into(),
            state: state.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn not_permitted(reason: impl Into<String>) -> Self {
        Self::Authorization(AuthorizationFailure::NotPermitted(reason.into()))
    }

    pub fn second_factor_required() -> Self {
        Self::Authorization(AuthorizationFailure::SecondFactorRequired)
    }

    /// Stable machine-readable tag, used in HTTP bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict { .. } => "conflict",
            Self::Authorization(_) => "authorization",
            Self::NotFound { .. } => "not_found",
            Self::Consistency { .. } => "consistency",
            Self::Unavailable(_) => "unavailable",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Consistency { .. } | Self::Unavailable(_))
    }
}
