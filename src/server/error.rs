use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::CoreError;
use crate::server::envelope::ApiEnvelope;

/// Standardised API error.
///
/// Every error returned by the HTTP layer serialises as the uniform
/// envelope with `success: false` and `type: "error"`:
/// ```json
/// { "success": false, "type": "error", "message": "...", "error": "SESSION_NOT_FOUND", "timestamp": "..." }
/// ```
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiEnvelope,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiEnvelope::error(code, message),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    #[cfg(test)]
    pub(crate) fn code(&self) -> Option<&str> {
        self.body.error.as_deref()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::InvalidInput(_) => Self::validation(message),
            CoreError::SessionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", message)
            }
            CoreError::ActionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "ACTION_NOT_FOUND", message)
            }
            CoreError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
            }
            CoreError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message),
            CoreError::ResolverUnavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "RESOLVER_UNAVAILABLE", message)
            }
            CoreError::Internal(_) => Self::internal(message),
        }
    }
}
