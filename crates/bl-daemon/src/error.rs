//! HTTP mapping of procurement errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bl_schemas::{AuthorizationFailure, ProcureError};
use tracing::warn;

use crate::api_types::ErrorResponse;

#[derive(Debug)]
pub enum ApiError {
    /// Identity headers missing or inconsistent.
    Unauthenticated(String),
    /// Request shape the handlers cannot interpret.
    BadRequest(String),
    Procure(ProcureError),
}

impl From<ProcureError> for ApiError {
    fn from(e: ProcureError) -> Self {
        Self::Procure(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Procure(e) => match e {
                ProcureError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ProcureError::Conflict { .. } => StatusCode::CONFLICT,
                ProcureError::Authorization(_) => StatusCode::FORBIDDEN,
                ProcureError::NotFound { .. } => StatusCode::NOT_FOUND,
                ProcureError::Consistency { .. } | ProcureError::Unavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Unauthenticated(msg) => ErrorResponse {
                error: "unauthenticated",
                message: msg.clone(),
                challenge_required: false,
            },
            Self::BadRequest(msg) => ErrorResponse {
                error: "bad_request",
                message: msg.clone(),
                challenge_required: false,
            },
            Self::Procure(e) => {
                if e.is_transient() {
                    warn!(error = %e, "request failed transiently");
                }
                ErrorResponse {
                    error: e.kind(),
                    message: e.to_string(),
                    challenge_required: matches!(
                        e,
                        ProcureError::Authorization(AuthorizationFailure::SecondFactorRequired)
                    ),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
