// ── Apply engine ──
//
// Renders the current policy into per-backend rule documents and pushes
// them to the enforcement layers. Only a run in which every layer accepted
// its document, and nothing changed meanwhile, reports `in_sync`.
// Concurrent `apply()` calls coalesce onto the run already in flight.

mod http;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::flight::SingleFlight;
use crate::model::{ApplyStatus, Capabilities};
use crate::resolver::resolve;
use crate::store::{ApplyTracker, PolicyStore};

pub use http::HttpEnforcementApplier;
pub use render::{DocumentFormat, EnforcementDocument, RenderOptions};

/// Accepts rule documents on behalf of the enforcement layers.
pub trait EnforcementApplier: Send + Sync {
    /// Replace the backend's active rules with `document`.
    fn submit<'a>(&'a self, document: &'a EnforcementDocument)
    -> BoxFuture<'a, Result<(), CoreError>>;
}

#[derive(Clone)]
pub struct ApplyEngine {
    inner: Arc<ApplyInner>,
}

struct ApplyInner {
    policy: Arc<PolicyStore>,
    tracker: Arc<ApplyTracker>,
    capabilities: watch::Receiver<Capabilities>,
    applier: Arc<dyn EnforcementApplier>,
    options: RenderOptions,
    timeout: Duration,
    flight: SingleFlight<ApplyStatus>,
}

impl ApplyEngine {
    pub fn new(
        policy: Arc<PolicyStore>,
        tracker: Arc<ApplyTracker>,
        capabilities: watch::Receiver<Capabilities>,
        applier: Arc<dyn EnforcementApplier>,
        options: RenderOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ApplyInner {
                policy,
                tracker,
                capabilities,
                applier,
                options,
                timeout,
                flight: SingleFlight::new("apply"),
            }),
        }
    }

    /// Push the current policy to every enforcement layer, or join the
    /// push already running.
    ///
    /// The state is captured when the run starts; changes made while it is
    /// in flight leave `pending_changes` set afterwards.
    ///
    /// Cancelling `cancel` returns `Cancelled` to this caller. The push is
    /// aborted only once every caller sharing it has cancelled.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<ApplyStatus, CoreError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .flight
            .run(move |abort| async move { inner.run(&abort).await }, cancel)
            .await
    }

    /// The documents an apply would submit right now.
    pub fn preview(&self) -> Vec<EnforcementDocument> {
        self.inner.render_current().1
    }

    pub fn status(&self) -> ApplyStatus {
        self.inner.tracker.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.flight.is_running()
    }
}

impl ApplyInner {
    fn render_current(&self) -> (u64, Vec<EnforcementDocument>) {
        let input = self.policy.capture(*self.capabilities.borrow());
        let reach = resolve(&input);
        (input.revision, render::render(&input, &reach, &self.options))
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<ApplyStatus, CoreError> {
        let (revision, documents) = self.render_current();
        info!(revision, documents = documents.len(), "applying rule documents");

        for document in &documents {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(CoreError::Cancelled),
                result = tokio::time::timeout(self.timeout, self.applier.submit(document)) => {
                    result.unwrap_or_else(|_| Err(CoreError::ApplyTimeout {
                        backend: document.backend.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    }))
                }
            };
            if let Err(e) = outcome {
                warn!(backend = %document.backend, error = %e, "apply failed");
                self.tracker.record_failure(&e.to_string());
                return Err(e);
            }
        }

        let status = self.tracker.record_success(revision, Utc::now());
        info!(revision, in_sync = status.in_sync, "apply complete");
        Ok(status)
    }
}
