//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use meshgate_config::ConfigError;
use meshgate_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const UPSTREAM: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found")]
    #[diagnostic(
        code(meshgate::no_config),
        help(
            "Create one with: meshgate config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(meshgate::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: meshgate config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No {service} credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(meshgate::no_credentials),
        help(
            "Store one with: meshgate config set-secret {service} --profile {profile}\n\
             Or name an environment variable with api_key_env in the profile."
        )
    )]
    NoCredentials { profile: String, service: String },

    #[error(transparent)]
    #[diagnostic(code(meshgate::config))]
    Config(ConfigError),

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(meshgate::validation))]
    Validation { field: String, reason: String },

    #[error("Client '{identifier}' not found")]
    #[diagnostic(
        code(meshgate::not_found),
        help("Run: meshgate clients list to see known clients")
    )]
    NotFound { identifier: String },

    #[error("Address {ip} already belongs to client {owner}")]
    #[diagnostic(code(meshgate::address_conflict))]
    Conflict { ip: String, owner: String },

    // ── Backends ─────────────────────────────────────────────────────
    #[error("Could not refresh clients from {backend}: {reason}")]
    #[diagnostic(
        code(meshgate::sync_failed),
        help("Check that {backend} is reachable, or raise --timeout.")
    )]
    SyncFailed { backend: String, reason: String },

    #[error("{backend} rejected the rule document: {reason}")]
    #[diagnostic(
        code(meshgate::apply_rejected),
        help(
            "The policy is saved but not enforced.\n\
             Inspect what would be sent with: meshgate apply --dry-run"
        )
    )]
    ApplyRejected { backend: String, reason: String },

    #[error("{backend} did not answer within {seconds}s")]
    #[diagnostic(
        code(meshgate::timeout),
        help("Increase timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { backend: String, seconds: u64 },

    #[error("Backend API error: {message}")]
    #[diagnostic(code(meshgate::api_error))]
    Api { message: String, status: Option<u16> },

    #[error("Operation cancelled")]
    #[diagnostic(code(meshgate::cancelled))]
    Cancelled,

    #[error("{0}")]
    #[diagnostic(code(meshgate::internal))]
    Internal(String),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Operation '{action}' requires confirmation")]
    #[diagnostic(
        code(meshgate::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    #[diagnostic(code(meshgate::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoCredentials { .. }
            | Self::Api {
                status: Some(401 | 403),
                ..
            } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::SyncFailed { .. } | Self::ApplyRejected { .. } | Self::Api { .. } => {
                exit_code::UPSTREAM
            }
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidPolicy { value } => CliError::Validation {
                field: "policy".into(),
                reason: format!("'{value}' is not one of block_all, selected, allow_all"),
            },
            CoreError::UnknownTarget { target_id } => CliError::Validation {
                field: "target".into(),
                reason: format!("no client with id {target_id}"),
            },
            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::ClientNotFound { identifier } => CliError::NotFound { identifier },
            CoreError::AddressConflict { ip, owner } => CliError::Conflict {
                ip: ip.to_string(),
                owner: owner.to_string(),
            },
            CoreError::SyncTransientFailure { backend, reason } => {
                CliError::SyncFailed { backend, reason }
            }
            CoreError::ApplyRejected { backend, reason } => {
                CliError::ApplyRejected { backend, reason }
            }
            CoreError::ApplyTimeout {
                backend,
                timeout_secs,
            } => CliError::Timeout {
                backend,
                seconds: timeout_secs,
            },
            CoreError::Cancelled => CliError::Cancelled,
            CoreError::Api { message, status } => CliError::Api { message, status },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Persistence { path, reason } => {
                CliError::Internal(format!("state file {path}: {reason}"))
            }
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile, service } => {
                CliError::NoCredentials { profile, service }
            }
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_exit_with_usage() {
        let err = CliError::from(CoreError::InvalidPolicy {
            value: "open".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn unauthorized_backend_exits_with_auth() {
        let err = CliError::from(CoreError::Api {
            message: "denied".into(),
            status: Some(401),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn apply_failures_exit_with_upstream_or_timeout() {
        let rejected = CliError::from(CoreError::ApplyRejected {
            backend: "headscale".into(),
            reason: "bad acl".into(),
        });
        let timed_out = CliError::from(CoreError::ApplyTimeout {
            backend: "wireguard".into(),
            timeout_secs: 5,
        });
        assert_eq!(rejected.exit_code(), exit_code::UPSTREAM);
        assert_eq!(timed_out.exit_code(), exit_code::TIMEOUT);
    }
}
