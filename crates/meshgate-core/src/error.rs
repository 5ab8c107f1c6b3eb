// ── Core error types ──
//
// User-facing errors from meshgate-core. Consumers never see HTTP status
// codes or JSON parse failures from the backends directly; the
// `From<meshgate_api::Error>` impl translates transport-layer errors into
// domain-appropriate variants.
//
// `CoreError` is `Clone` so that callers coalesced onto one in-flight
// sync/apply can all receive the same outcome.

use std::net::IpAddr;

use thiserror::Error;

use crate::model::ClientId;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Validation (immediate rejection, no state change) ────────────
    #[error("Invalid ACL policy '{value}': expected block_all, selected, or allow_all")]
    InvalidPolicy { value: String },

    #[error("Unknown rule target: {target_id}")]
    UnknownTarget { target_id: String },

    #[error("Client not found: {identifier}")]
    ClientNotFound { identifier: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Address {ip} is already assigned to client {owner}")]
    AddressConflict { ip: IpAddr, owner: ClientId },

    // ── Sync ─────────────────────────────────────────────────────────
    #[error("Sync from {backend} failed: {reason}")]
    SyncTransientFailure { backend: String, reason: String },

    // ── Apply ────────────────────────────────────────────────────────
    #[error("Enforcement rejected the {backend} rule document: {reason}")]
    ApplyRejected { backend: String, reason: String },

    #[error("Enforcement for {backend} timed out after {timeout_secs}s")]
    ApplyTimeout { backend: String, timeout_secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Local state ──────────────────────────────────────────────────
    #[error("Failed to persist state to {path}: {reason}")]
    Persistence { path: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Backend API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Errors caused by the caller's input. These never reach an external
    /// system and leave all state unchanged.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPolicy { .. }
                | Self::UnknownTarget { .. }
                | Self::ClientNotFound { .. }
                | Self::ValidationFailed { .. }
        )
    }

    /// Failures of an external call that are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SyncTransientFailure { .. }
                | Self::ApplyRejected { .. }
                | Self::ApplyTimeout { .. }
                | Self::Cancelled
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<meshgate_api::Error> for CoreError {
    fn from(err: meshgate_api::Error) -> Self {
        match err {
            meshgate_api::Error::Authentication { message } => Self::Api {
                message: format!("authentication failed: {message}"),
                status: Some(401),
            },
            meshgate_api::Error::Transport(ref e) => Self::Api {
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            },
            meshgate_api::Error::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            meshgate_api::Error::Timeout { timeout_secs } => Self::Api {
                message: format!("request timed out after {timeout_secs}s"),
                status: None,
            },
            meshgate_api::Error::Tls(msg) => Self::Config {
                message: format!("TLS error: {msg}"),
            },
            meshgate_api::Error::Api { status, message } => Self::Api {
                message,
                status: Some(status),
            },
            meshgate_api::Error::Deserialization { message, body: _ } => {
                Self::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = CoreError::UnknownTarget {
            target_id: "x".into(),
        };
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn apply_timeout_is_retryable() {
        let err = CoreError::ApplyTimeout {
            backend: "headscale".into(),
            timeout_secs: 10,
        };
        assert!(err.is_retryable());
        assert!(!err.is_validation());
    }

    #[test]
    fn api_status_survives_conversion() {
        let err = CoreError::from(meshgate_api::Error::Api {
            status: 422,
            message: "bad".into(),
        });
        assert!(matches!(
            err,
            CoreError::Api {
                status: Some(422),
                ..
            }
        ));
    }
}
