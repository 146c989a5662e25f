//! Application-wide error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Protocol(#[from] rwa_protocol::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery error: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl LedgerError {
    pub fn status(&self) -> StatusCode {
        use rwa_protocol::Error as E;
        match self {
            LedgerError::Protocol(e) => match e {
                E::RecordNotFound(_) => StatusCode::NOT_FOUND,
                E::NoAuth(_) => StatusCode::FORBIDDEN,
                E::RecordExists(_) => StatusCode::CONFLICT,
                E::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            },
            LedgerError::Delivery(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Protocol(e) => e.kind(),
            LedgerError::Delivery(_) => "delivery",
            LedgerError::Config(_) => "config",
            _ => "internal",
        }
    }

    fn message(&self) -> String {
        match self {
            LedgerError::Protocol(e) => e.reason(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorResponse {
            error: self.kind(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
