// ── HTTP enforcement applier ──
//
// Pushes rendered documents to the real enforcement layers: the Headscale
// policy endpoint and the WireGuard host agent.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use meshgate_api::{HeadscaleClient, WgAgentClient};
use tracing::debug;

use super::EnforcementApplier;
use super::render::EnforcementDocument;
use crate::error::CoreError;
use crate::model::Backend;

pub struct HttpEnforcementApplier {
    headscale: Option<HeadscaleClient>,
    wireguard: Option<WgAgentClient>,
    timeout_secs: u64,
}

impl HttpEnforcementApplier {
    pub fn new(
        headscale: Option<HeadscaleClient>,
        wireguard: Option<WgAgentClient>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            headscale,
            wireguard,
            timeout_secs,
        }
    }

    fn enforcement_error(&self, backend: Backend, err: &meshgate_api::Error) -> CoreError {
        match err {
            meshgate_api::Error::Timeout { timeout_secs } => CoreError::ApplyTimeout {
                backend: backend.to_string(),
                timeout_secs: *timeout_secs,
            },
            meshgate_api::Error::Transport(e) if e.is_timeout() => CoreError::ApplyTimeout {
                backend: backend.to_string(),
                timeout_secs: self.timeout_secs,
            },
            other => CoreError::ApplyRejected {
                backend: backend.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

fn not_configured(backend: Backend) -> CoreError {
    CoreError::Config {
        message: format!("no {backend} connection configured"),
    }
}

impl EnforcementApplier for HttpEnforcementApplier {
    fn submit<'a>(&'a self, document: &'a EnforcementDocument) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            debug!(backend = %document.backend, bytes = document.body.len(), "submitting rule document");
            match document.backend {
                Backend::Headscale => {
                    let client = self
                        .headscale
                        .as_ref()
                        .ok_or_else(|| not_configured(Backend::Headscale))?;
                    client
                        .set_policy(&document.body)
                        .await
                        .map(|_| ())
                        .map_err(|e| self.enforcement_error(Backend::Headscale, &e))
                }
                Backend::WireGuard => {
                    let client = self
                        .wireguard
                        .as_ref()
                        .ok_or_else(|| not_configured(Backend::WireGuard))?;
                    client
                        .apply_ruleset(&document.body)
                        .await
                        .map_err(|e| self.enforcement_error(Backend::WireGuard, &e))
                }
            }
        }
        .boxed()
    }
}
