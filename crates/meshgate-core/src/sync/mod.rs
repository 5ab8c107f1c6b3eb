// ── Sync coordinator ──
//
// Pulls the client list from every backend and folds it into the registry.
// A pass either sees every backend or changes nothing: one failed fetch
// leaves the registry exactly as it was and marks the sync status stale.
// Concurrent `sync()` calls coalesce onto the pass already in flight.

mod reconcile;
pub mod sources;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::flight::SingleFlight;
use crate::model::{Backend, BackendRef, ClientId, ObservedClient, SyncState, SyncStatus};
use crate::store::{ApplyTracker, ClientRegistry, PolicyStore};

pub use sources::{HeadscaleSource, WireGuardSource};

/// A clean pass in which a client is missing counts as one miss; it is
/// removed once it reaches this many consecutive misses.
pub const REMOVE_AFTER_MISSES: u8 = 2;

/// One backend's view of its clients.
pub trait ClientSource: Send + Sync {
    fn backend(&self) -> Backend;

    /// Every client the backend currently knows about.
    fn fetch(&self) -> BoxFuture<'_, Result<SourceListing, CoreError>>;
}

/// One fetch's worth of clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceListing {
    pub clients: Vec<ObservedClient>,
    /// Clients the backend still lists but without a usable address. They
    /// count as present, so they are not removed, but are left unchanged.
    pub unaddressed: Vec<BackendRef>,
}

impl SourceListing {
    fn extend(&mut self, other: SourceListing) {
        self.clients.extend(other.clients);
        self.unaddressed.extend(other.unaddressed);
    }
}

impl From<Vec<ObservedClient>> for SourceListing {
    fn from(clients: Vec<ObservedClient>) -> Self {
        Self {
            clients,
            unaddressed: Vec::new(),
        }
    }
}

/// What one sync pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Clients reported across all backends.
    pub observed: usize,
    pub added: Vec<ClientId>,
    /// Existing clients refreshed in place.
    pub updated: usize,
    pub readdressed: Vec<ClientId>,
    /// Clients carried over to a new backend identity.
    pub migrated: Vec<ClientId>,
    /// Clients missing from this pass but not yet removed.
    pub absent: Vec<ClientId>,
    /// Clients listed without a usable address; kept as they were.
    pub unaddressed: Vec<ClientId>,
    pub removed: Vec<ClientId>,
    /// Observations skipped because they collided with another client.
    pub conflicts: Vec<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    /// Whether enforcement needs to be re-rendered because of this pass.
    pub fn membership_changed(&self) -> bool {
        !self.added.is_empty()
            || !self.removed.is_empty()
            || !self.readdressed.is_empty()
            || !self.migrated.is_empty()
    }
}

#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    registry: Arc<ClientRegistry>,
    policy: Arc<PolicyStore>,
    tracker: Arc<ApplyTracker>,
    sources: Vec<Arc<dyn ClientSource>>,
    timeout: Duration,
    status: watch::Sender<SyncStatus>,
    last_report: watch::Sender<Option<SyncReport>>,
    flight: SingleFlight<SyncReport>,
}

impl SyncCoordinator {
    pub fn new(
        registry: Arc<ClientRegistry>,
        policy: Arc<PolicyStore>,
        tracker: Arc<ApplyTracker>,
        sources: Vec<Arc<dyn ClientSource>>,
        timeout: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let (last_report, _) = watch::channel(None);
        Self {
            inner: Arc::new(SyncInner {
                registry,
                policy,
                tracker,
                sources,
                timeout,
                status,
                last_report,
                flight: SingleFlight::new("sync"),
            }),
        }
    }

    /// Run one pass, or join the pass already running.
    ///
    /// Cancelling `cancel` returns `Cancelled` to this caller. The pass is
    /// aborted only once every caller sharing it has cancelled, and only
    /// while it is still fetching; the registry is written once every
    /// fetch has returned.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, CoreError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .flight
            .run(move |abort| async move { inner.run_pass(&abort).await }, cancel)
            .await
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Report of the most recent successful pass.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.inner.last_report.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Backends with a configured source.
    pub fn backends(&self) -> Vec<Backend> {
        let mut out: Vec<Backend> = self.inner.sources.iter().map(|s| s.backend()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn is_running(&self) -> bool {
        self.inner.flight.is_running()
    }
}

impl SyncInner {
    async fn run_pass(&self, cancel: &CancellationToken) -> Result<SyncReport, CoreError> {
        if self.sources.is_empty() {
            return Err(CoreError::Config {
                message: "no backends configured".into(),
            });
        }

        self.status.send_modify(|s| {
            s.state = SyncState::Syncing;
            s.last_attempt_at = Some(Utc::now());
        });

        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.fetch_all() => result,
        };

        let listing = match fetched {
            Ok(listing) => listing,
            Err(CoreError::Cancelled) => {
                self.status.send_modify(|s| s.state = SyncState::Idle);
                return Err(CoreError::Cancelled);
            }
            Err(e) => {
                warn!(error = %e, "sync failed; keeping previous registry state");
                self.status.send_modify(|s| {
                    s.state = SyncState::Idle;
                    s.stale = true;
                    s.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let mut report = reconcile::reconcile(&self.registry, listing, Utc::now());
        for id in &report.removed {
            self.policy.forget(id);
        }
        if report.membership_changed() {
            self.tracker.mark_pending();
        }

        let finished = Utc::now();
        report.finished_at = Some(finished);
        self.status.send_modify(|s| {
            s.state = SyncState::Idle;
            s.stale = false;
            s.last_error = None;
            s.last_synced_at = Some(finished);
        });
        self.last_report.send_replace(Some(report.clone()));

        info!(
            observed = report.observed,
            added = report.added.len(),
            removed = report.removed.len(),
            migrated = report.migrated.len(),
            unaddressed = report.unaddressed.len(),
            conflicts = report.conflicts.len(),
            "sync complete"
        );
        Ok(report)
    }

    /// Fetch every backend concurrently. The first failure fails the pass.
    async fn fetch_all(&self) -> Result<SourceListing, CoreError> {
        let fetches = self.sources.iter().map(|source| async move {
            let backend = source.backend();
            match tokio::time::timeout(self.timeout, source.fetch()).await {
                Ok(Ok(clients)) => Ok(clients),
                Ok(Err(e @ CoreError::SyncTransientFailure { .. })) => Err(e),
                Ok(Err(e)) => Err(CoreError::SyncTransientFailure {
                    backend: backend.to_string(),
                    reason: e.to_string(),
                }),
                Err(_) => Err(CoreError::SyncTransientFailure {
                    backend: backend.to_string(),
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                }),
            }
        });

        let batches = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        let mut listing = SourceListing::default();
        for batch in batches {
            listing.extend(batch);
        }
        Ok(listing)
    }
}
