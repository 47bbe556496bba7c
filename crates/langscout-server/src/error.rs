use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use langscout_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::HttpError(_) | AppError::NetworkError(_) | AppError::DnsError(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            AppError::FailureThreshold { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "scheduler_stopped")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        error_response(status, error_type, self.0.to_string())
    }
}

/// JSON error body with the given status and machine-readable kind.
pub fn error_response(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        error: kind.to_string(),
        message: message.into(),
    };
    (status, axum::Json(body)).into_response()
}

pub fn not_found(message: impl Into<String>) -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", message)
}
