// WireGuard host agent client.
//
// The agent runs next to the WireGuard interface. It exposes the peer list
// and accepts complete nftables rulesets for the forward path.
//
// Base path: /api/
// Auth: Authorization: Bearer <api key>

use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::{self, TransportConfig};

/// A configured WireGuard peer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WgPeer {
    pub id: String,
    pub name: String,
    pub public_key: String,
    /// Tunnel address assigned to the peer (no prefix length).
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub latest_handshake_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_enabled() -> bool {
    true
}

/// Async client for the WireGuard host agent.
#[derive(Clone)]
pub struct WgAgentClient {
    http: reqwest::Client,
    base_url: Url,
}

impl WgAgentClient {
    /// Build an authenticated client.
    pub fn from_api_key(
        base_url: &str,
        api_key: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_bearer_client(api_key)?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    /// Build a client for an agent that does not require auth
    /// (e.g. bound to a unix-socket proxy on localhost).
    pub fn anonymous(base_url: &str, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url: Url::parse(base_url)?,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    /// The agent base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List all peers configured on the interface.
    pub async fn list_peers(&self) -> Result<Vec<WgPeer>, Error> {
        let url = transport::join(&self.base_url, "api/wireguard/client")?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        transport::handle_response(resp).await
    }

    /// Replace the forward-path ruleset. The agent loads it atomically
    /// (`nft -f`) and answers 4xx if the script does not parse.
    pub async fn apply_ruleset(&self, ruleset: &str) -> Result<(), Error> {
        let url = transport::join(&self.base_url, "api/firewall/ruleset")?;
        debug!(bytes = ruleset.len(), "PUT {url}");

        let resp = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(ruleset.to_owned())
            .send()
            .await?;
        transport::handle_empty(resp).await
    }
}
