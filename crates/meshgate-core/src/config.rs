// ── Runtime engine configuration ──
//
// These types describe *which* backends the engine talks to and how. They
// carry credential data and tuning, but never touch disk. The binary builds
// an `EngineConfig` (via meshgate-config) and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::model::Backend;

/// TLS verification strategy for backend connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed lab deployments).
    DangerAcceptInvalid,
}

/// Connection to a Headscale coordination server.
#[derive(Debug, Clone)]
pub struct HeadscaleConfig {
    pub url: Url,
    pub api_key: SecretString,
}

/// Connection to the agent on the WireGuard host.
#[derive(Debug, Clone)]
pub struct WireGuardConfig {
    pub url: Url,
    pub api_key: Option<SecretString>,
    /// Tunnel interface the forward-path rules are scoped to.
    pub interface: String,
}

/// DNS rewrite webhook.
#[derive(Debug, Clone)]
pub struct DnsWebhookConfig {
    pub url: Url,
    pub token: Option<SecretString>,
}

/// Complete configuration for one policy engine deployment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub headscale: Option<HeadscaleConfig>,
    pub wireguard: Option<WireGuardConfig>,
    pub dns_webhook: Option<DnsWebhookConfig>,
    /// TLS verification for every backend connection.
    pub tls: TlsVerification,
    /// Upper bound for each external call (fetch or submit).
    pub timeout: Duration,
    /// Period of the background sync. `Duration::ZERO` disables it.
    pub sync_interval: Duration,
    /// Whether the cross-network router is up, i.e. whether clients on
    /// different backends can reach each other at all.
    pub bridge_available: bool,
    /// JSON file holding clients and rules between restarts.
    pub state_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            headscale: None,
            wireguard: None,
            dns_webhook: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(60),
            bridge_available: true,
            state_path: None,
        }
    }
}

impl EngineConfig {
    /// Backends with a configured connection, in canonical order.
    pub fn backends(&self) -> Vec<Backend> {
        let mut out = Vec::with_capacity(2);
        if self.headscale.is_some() {
            out.push(Backend::Headscale);
        }
        if self.wireguard.is_some() {
            out.push(Backend::WireGuard);
        }
        out
    }

    /// Name of the WireGuard interface used in rendered rulesets.
    pub fn wireguard_interface(&self) -> &str {
        self.wireguard
            .as_ref()
            .map_or(DEFAULT_WG_INTERFACE, |w| w.interface.as_str())
    }
}

pub const DEFAULT_WG_INTERFACE: &str = "wg0";
