// DNS rewrite webhook client.
//
// POSTs rewrite toggles as JSON to an operator-configured URL. The receiving
// side (AdGuard/Pi-hole glue) owns the actual rewrite records.

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::{self, TransportConfig};

/// Payload sent for every rewrite toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRewriteRequest {
    pub client_id: String,
    pub name: String,
    pub ip: String,
    pub enabled: bool,
}

/// Webhook client for the DNS rewrite collaborator.
#[derive(Clone)]
pub struct DnsWebhookClient {
    http: reqwest::Client,
    url: Url,
}

impl DnsWebhookClient {
    /// Build a client; `token` is sent as a bearer token when present.
    pub fn new(
        url: &str,
        token: Option<&SecretString>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = match token {
            Some(token) => transport.build_bearer_client(token)?,
            None => transport.build_client()?,
        };
        Ok(Self {
            http,
            url: Url::parse(url)?,
        })
    }

    /// Announce a rewrite change.
    pub async fn set_rewrite(&self, request: &DnsRewriteRequest) -> Result<(), Error> {
        debug!(client = %request.client_id, enabled = request.enabled, "POST {}", self.url);

        let resp = self.http.post(self.url.clone()).json(request).send().await?;
        transport::handle_empty(resp).await
    }
}
