// nllb-sidecar: error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Sidecar result type
pub type SidecarResult<T> = Result<T, SidecarError>;

/// Sidecar error types. Variants line up with the HTTP statuses the
/// external interface assigns to `/translate`, `/benchmark`, and
/// `/health` failure modes.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("service degraded: {0}")]
    ServiceDegraded(String),

    #[error("benchmark request conflicts with one already running")]
    BenchmarkConflict,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("ledger error: {0}")]
    LedgerError(String),

    #[error("tls error: {0}")]
    TlsError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for SidecarError {
    fn from(err: std::io::Error) -> Self {
        SidecarError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SidecarError {
    fn from(err: serde_json::Error) -> Self {
        SidecarError::LedgerError(err.to_string())
    }
}

impl IntoResponse for SidecarError {
    fn into_response(self) -> Response {
        let status = match &self {
            SidecarError::ModelNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            SidecarError::ServiceDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
            SidecarError::BenchmarkConflict => StatusCode::CONFLICT,
            SidecarError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            SidecarError::ValidationError(_) => StatusCode::BAD_REQUEST,
            SidecarError::LedgerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SidecarError::TlsError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SidecarError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SidecarError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SidecarError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
