//! Application error type mapping to HTTP status codes and envelope format.

use std::time::Instant;

use axum::response::{IntoResponse, Response};

use hrflow_types::error::EngineError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Errors from the engine services.
    Engine(EngineError),
    /// Missing or malformed gateway identity headers.
    Unauthorized(String),
    /// Malformed query or path input.
    Validation(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Engine(e)
    }
}

impl AppError {
    fn code_and_message(&self) -> (&'static str, String) {
        match self {
            AppError::Engine(e @ EngineError::NotFound(_)) => ("NOT_FOUND", e.to_string()),
            AppError::Engine(EngineError::Forbidden(msg)) => ("FORBIDDEN", msg.clone()),
            AppError::Engine(EngineError::BadRequest(msg)) => ("BAD_REQUEST", msg.clone()),
            AppError::Engine(EngineError::Conflict(msg)) => ("CONFLICT", msg.clone()),
            AppError::Engine(e @ EngineError::Validation(_)) => ("VALIDATION_ERROR", e.to_string()),
            AppError::Engine(EngineError::Storage(msg)) => {
                tracing::error!(error = %msg, "storage failure");
                ("STORAGE_ERROR", "internal storage error".to_string())
            }
            AppError::Unauthorized(msg) => ("UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, message) = self.code_and_message();
        ApiResponse::error(code, &message, Instant::now()).into_response()
    }
}
