// ── Identity types ──
//
// `ClientId` is the engine's own identifier; it never changes for the life
// of a client, even when the backend-side identity does. `BackendRef` is
// the backend's identifier and is how sync correlates observations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── ClientId ────────────────────────────────────────────────────────

/// Stable, engine-assigned client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Mint a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for ClientId {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

// ── Backend ─────────────────────────────────────────────────────────

/// The two mesh systems the engine bridges.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Backend {
    Headscale,
    WireGuard,
}

// ── BackendRef ──────────────────────────────────────────────────────

/// Backend-native identity of a client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum BackendRef {
    Headscale { node_id: u64 },
    WireGuard { public_key: String },
}

impl BackendRef {
    pub fn backend(&self) -> Backend {
        match self {
            Self::Headscale { .. } => Backend::Headscale,
            Self::WireGuard { .. } => Backend::WireGuard,
        }
    }

    /// The identifier as the backend itself prints it.
    pub fn external_id(&self) -> String {
        match self {
            Self::Headscale { node_id } => node_id.to_string(),
            Self::WireGuard { public_key } => public_key.clone(),
        }
    }
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend(), self.external_id())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backend_wire_names() {
        assert_eq!(Backend::WireGuard.to_string(), "wireguard");
        assert_eq!(
            serde_json::to_value(Backend::Headscale).unwrap(),
            serde_json::json!("headscale")
        );
        assert_eq!("WireGuard".parse::<Backend>().unwrap(), Backend::WireGuard);
    }

    #[test]
    fn backend_ref_serializes_tagged() {
        let r = BackendRef::WireGuard {
            public_key: "abc=".into(),
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v, serde_json::json!({"backend": "wireguard", "publicKey": "abc="}));
        assert_eq!(r.to_string(), "wireguard:abc=");
    }

    #[test]
    fn client_id_parses_with_whitespace() {
        let id = ClientId::generate();
        let parsed: ClientId = format!(" {id} ").parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ClientId>().is_err());
    }
}
