use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

/// Failures of the signal pipeline. Too few candles is not an error: it
/// yields NaN/empty output instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SignalError {
    #[error("worker request {request_id} timed out after {timeout_ms}ms")]
    WorkerTimeout { request_id: u64, timeout_ms: u64 },
    #[error("worker crashed while handling request {request_id}: {message}")]
    WorkerCrash { request_id: u64, message: String },
    #[error("worker pool is shut down")]
    WorkerUnavailable,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("calculation error: {0}")]
    Calculation(String),
    #[error("throttled request dropped: {0}")]
    Throttle(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::Upstream(message) => (StatusCode::BAD_GATEWAY, message.clone()),
            AppError::Timeout(message) => (StatusCode::GATEWAY_TIMEOUT, message.clone()),
            AppError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message.clone()),
        };

        let body = Json(ErrorResponse { message });
        (status, body).into_response()
    }
}

impl From<SignalError> for AppError {
    fn from(error: SignalError) -> Self {
        match error {
            SignalError::InvalidConfig(_) => AppError::Validation(error.to_string()),
            SignalError::WorkerTimeout { .. } => AppError::Timeout(error.to_string()),
            _ => AppError::Internal(error.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error.to_string())
    }
}
