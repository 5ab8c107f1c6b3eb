// Headscale control API client.
//
// Base path: /api/v1/
// Auth: Authorization: Bearer <api key>

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::{self, TransportConfig};

// ── Wire types ───────────────────────────────────────────────────────

/// Owner of a Headscale node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadscaleUser {
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub id: u64,
    pub name: String,
}

/// A node as returned by `GET /api/v1/node`.
///
/// Headscale renders its protobuf messages as camelCase JSON with 64-bit
/// integers encoded as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadscaleNode {
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub user: Option<HeadscaleUser>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl HeadscaleNode {
    /// The name operators see: the admin-assigned given name if set,
    /// otherwise the machine's hostname.
    pub fn display_name(&self) -> &str {
        self.given_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }
}

#[derive(Deserialize)]
struct ListNodesResponse {
    #[serde(default)]
    nodes: Vec<HeadscaleNode>,
}

#[derive(Serialize)]
struct SetPolicyRequest<'a> {
    policy: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyResponse {
    #[serde(default)]
    policy: String,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn u64_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for a Headscale coordination server.
#[derive(Clone)]
pub struct HeadscaleClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HeadscaleClient {
    /// Build from an API key and transport config.
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

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    /// The server base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List every node registered with the coordination server.
    pub async fn list_nodes(&self) -> Result<Vec<HeadscaleNode>, Error> {
        let url = transport::join(&self.base_url, "api/v1/node")?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        let body: ListNodesResponse = transport::handle_response(resp).await?;
        Ok(body.nodes)
    }

    /// Fetch the ACL policy document currently loaded by the server.
    pub async fn get_policy(&self) -> Result<String, Error> {
        let url = transport::join(&self.base_url, "api/v1/policy")?;
        debug!("GET {url}");

        let resp = self.http.get(url).send().await?;
        let body: PolicyResponse = transport::handle_response(resp).await?;
        Ok(body.policy)
    }

    /// Replace the server's ACL policy. Headscale validates the document and
    /// answers 4xx if it cannot be loaded.
    ///
    /// Returns the server-side update timestamp, when reported.
    pub async fn set_policy(&self, policy: &str) -> Result<Option<DateTime<Utc>>, Error> {
        let url = transport::join(&self.base_url, "api/v1/policy")?;
        debug!(bytes = policy.len(), "PUT {url}");

        let resp = self
            .http
            .put(url)
            .json(&SetPolicyRequest { policy })
            .send()
            .await?;
        let body: PolicyResponse = transport::handle_response(resp).await?;
        Ok(body.updated_at)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_accept_strings_and_numbers() {
        let a: HeadscaleNode =
            serde_json::from_str(r#"{"id":"17","name":"laptop","ipAddresses":[]}"#).unwrap();
        let b: HeadscaleNode = serde_json::from_str(r#"{"id":17,"name":"laptop"}"#).unwrap();
        assert_eq!(a.id, 17);
        assert_eq!(b.id, 17);
    }

    #[test]
    fn display_name_prefers_given_name() {
        let node: HeadscaleNode = serde_json::from_str(
            r#"{"id":"1","name":"host-a1b2","givenName":"laptop","ipAddresses":["100.64.0.1"]}"#,
        )
        .unwrap();
        assert_eq!(node.display_name(), "laptop");

        let bare: HeadscaleNode =
            serde_json::from_str(r#"{"id":"1","name":"host-a1b2","givenName":""}"#).unwrap();
        assert_eq!(bare.display_name(), "host-a1b2");
    }
}
