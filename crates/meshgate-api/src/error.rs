use thiserror::Error;

/// Top-level error type for the `meshgate-api` crate.
///
/// Covers every failure mode of the backend clients: authentication,
/// transport, structured API errors, and payload decoding. `meshgate-core`
/// maps these into policy-engine errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected our credentials (401/403).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── API ─────────────────────────────────────────────────────────
    /// Non-success HTTP status with whatever message the backend returned.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the backend looked at the payload and refused it
    /// (a 4xx other than auth / not-found / rate limiting).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Api { status, .. }
                if (400..500).contains(status) && !matches!(*status, 401 | 403 | 404 | 429)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_rejection());
    }

    #[test]
    fn unprocessable_is_a_rejection() {
        let err = Error::Api {
            status: 422,
            message: "bad ruleset".into(),
        };
        assert!(err.is_rejection());
        assert!(!err.is_transient());
    }

    #[test]
    fn auth_failures_are_not_rejections() {
        let err = Error::Api {
            status: 401,
            message: "nope".into(),
        };
        assert!(!err.is_rejection());
    }
}
