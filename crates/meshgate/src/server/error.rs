//! api error handling for http handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use meshgate_core::CoreError;

/// api error type for handler responses
#[derive(Debug)]
pub enum ApiError {
    /// malformed request (400)
    BadRequest(String),
    /// unknown client (404)
    NotFound(String),
    /// address collision (409)
    Conflict(String),
    /// well-formed but invalid policy (422)
    Unprocessable(String),
    /// a backend failed or refused (502)
    BadGateway(String),
    /// a backend did not answer in time (504)
    GatewayTimeout(String),
    /// the engine is shutting down or the call was cancelled (503)
    Unavailable(String),
    /// internal server error (500)
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// status a core error maps to
    pub fn status_of(err: &CoreError) -> StatusCode {
        match err {
            CoreError::InvalidPolicy { .. } => StatusCode::BAD_REQUEST,
            CoreError::UnknownTarget { .. } | CoreError::ValidationFailed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CoreError::ClientNotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::AddressConflict { .. } => StatusCode::CONFLICT,
            CoreError::SyncTransientFailure { .. }
            | CoreError::ApplyRejected { .. }
            | CoreError::Api { .. } => StatusCode::BAD_GATEWAY,
            CoreError::ApplyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Persistence { .. } | CoreError::Config { .. } | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn parts(self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let msg = err.to_string();
        match ApiError::status_of(&err) {
            StatusCode::BAD_REQUEST => ApiError::BadRequest(msg),
            StatusCode::NOT_FOUND => ApiError::NotFound(msg),
            StatusCode::CONFLICT => ApiError::Conflict(msg),
            StatusCode::UNPROCESSABLE_ENTITY => ApiError::Unprocessable(msg),
            StatusCode::BAD_GATEWAY => ApiError::BadGateway(msg),
            StatusCode::GATEWAY_TIMEOUT => ApiError::GatewayTimeout(msg),
            StatusCode::SERVICE_UNAVAILABLE => ApiError::Unavailable(msg),
            _ => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(%status, %message, "request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// extension trait for converting options to apierror
pub trait OptionExt<T> {
    /// convert none to not found error
    fn or_not_found(self, msg: &str) -> Result<T, ApiError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(msg))
    }
}
