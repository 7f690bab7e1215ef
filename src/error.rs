//! HTTP error type and the JSON envelopes shared by all endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use log::error;
use serde_json::{json, Value};
use thiserror::Error;

use crate::twitter::ClientError;

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Database(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Client(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Client(_) => "TWITTER_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "Invalid request",
            ApiError::NotFound(_) => "Resource not found",
            ApiError::Client(_) => "X operation failed",
            ApiError::Database(_) => "Database operation failed",
        }
    }

    /// Wraps a storage error.
    pub fn database(e: impl std::fmt::Display) -> Self {
        ApiError::Database(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        }
        (
            status,
            Json(error_body(self.error_code(), self.summary(), Some(&self.to_string()))),
        )
            .into_response()
    }
}

/// Builds the error envelope: `{success, error_code, message, details, timestamp}`.
pub fn error_body(error_code: &str, message: &str, details: Option<&str>) -> Value {
    json!({
        "success": false,
        "error_code": error_code,
        "message": message,
        "details": details,
        "timestamp": Utc::now(),
    })
}

/// Builds the success envelope: `{success, message, data, timestamp}`.
pub fn success_body(data: Value, message: &str) -> Value {
    json!({
        "success": true,
        "message": message,
        "data": data,
        "timestamp": Utc::now(),
    })
}
