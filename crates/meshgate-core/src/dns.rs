// ── DNS rewrite passthrough ──
//
// The DNS toggle never affects reachability. The engine only forwards the
// change to whatever owns the resolver, then records the flag.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use meshgate_api::{DnsRewriteRequest, DnsWebhookClient};

use crate::error::CoreError;
use crate::model::VpnClient;

/// Owner of the DNS rewrites for client names.
pub trait DnsRewriter: Send + Sync {
    fn set_rewrite<'a>(
        &'a self,
        client: &'a VpnClient,
        enabled: bool,
    ) -> BoxFuture<'a, Result<(), CoreError>>;
}

/// Announces rewrite changes to an HTTP webhook.
pub struct WebhookDnsRewriter {
    client: DnsWebhookClient,
}

impl WebhookDnsRewriter {
    pub fn new(client: DnsWebhookClient) -> Self {
        Self { client }
    }
}

impl DnsRewriter for WebhookDnsRewriter {
    fn set_rewrite<'a>(
        &'a self,
        client: &'a VpnClient,
        enabled: bool,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            let request = DnsRewriteRequest {
                client_id: client.id.to_string(),
                name: client.name.clone(),
                ip: client.ip.to_string(),
                enabled,
            };
            self.client.set_rewrite(&request).await?;
            Ok(())
        }
        .boxed()
    }
}
