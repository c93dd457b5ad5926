//! Error handling for the sorting-line controller

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error (bad bucket id, non-positive threshold, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Frame source could not be opened after all retries
    #[error("Frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// Another session owns the conveyor relay
    #[error("Actuator busy: {0}")]
    ActuatorBusy(String),

    /// Relay write failed
    #[error("Actuator error: {0}")]
    Actuator(String),

    /// Ledger file could not be written or read
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Client is gone or the outbound channel closed
    #[error("Transmission error: {0}")]
    Transmission(String),

    /// Frame read or decode failure inside the loop
    #[error("Frame error: {0}")]
    Frame(String),

    /// JPEG encode failure
    #[error("Encode error: {0}")]
    Encode(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable snake_case code carried in `{"type":"error"}` events
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation_error",
            Error::SourceUnavailable(_) => "source_unavailable",
            Error::ActuatorBusy(_) => "actuator_busy",
            Error::Actuator(_) => "actuator_error",
            Error::Persistence(_) => "persistence_error",
            Error::Transmission(_) => "transmission_error",
            Error::Frame(_) => "frame_error",
            Error::Encode(_) => "encode_error",
            Error::Config(_) => "config_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::SourceUnavailable(_) | Error::ActuatorBusy(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::Actuator(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
