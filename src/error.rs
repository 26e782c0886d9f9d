//! Structured API errors.
//!
//! DESIGN
//! ======
//! Every service owns a `thiserror` enum and implements [`ErrorCode`] for it:
//! a grepable `E_*` code, an HTTP status, and a retryable flag. Routes
//! convert service errors into [`ApiError`], which renders the uniform JSON
//! body `{ "code", "message", "retryable" }`.
//!
//! ERROR HANDLING
//! ==============
//! Database failures are logged with full detail and surfaced as a generic
//! message so SQL text never leaks to clients.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub const E_DATABASE: &str = "E_DATABASE";

/// Grepable error code, status, and retryable flag for structured errors.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn status(&self) -> StatusCode;

    fn retryable(&self) -> bool {
        false
    }
}

/// Error response body shared by every route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into(), retryable: false }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "E_INVALID_INPUT", message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "E_NOT_FOUND", message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "E_UNAUTHORIZED", "authentication required")
    }

    #[must_use]
    pub fn database(err: &sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: E_DATABASE, message: "database error".into(), retryable: true }
    }

    /// Convert any typed service error. Database-coded errors are masked.
    pub fn from_code(err: &(impl ErrorCode + ?Sized)) -> Self {
        let status = err.status();
        if err.error_code() == E_DATABASE || status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, code = err.error_code(), "internal error");
            return Self {
                status,
                code: err.error_code(),
                message: "internal error".into(),
                retryable: err.retryable(),
            };
        }
        Self { status, code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status.as_u16(), self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.code,
            "message": self.message,
            "retryable": self.retryable,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(&err)
    }
}

/// Implement `From<$ty> for ApiError` through [`ErrorCode`].
macro_rules! impl_api_error {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for $crate::error::ApiError {
                fn from(err: $ty) -> Self {
                    Self::from_code(&err)
                }
            }
        )+
    };
}

pub(crate) use impl_api_error;

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
