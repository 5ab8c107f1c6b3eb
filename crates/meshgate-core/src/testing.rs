// ── In-memory collaborators ──
//
// Stand-ins for the backends, the enforcement layers and the DNS webhook,
// for tests here and in downstream crates (feature `testing`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::apply::{EnforcementApplier, EnforcementDocument};
use crate::dns::DnsRewriter;
use crate::engine::Collaborators;
use crate::error::CoreError;
use crate::model::{Backend, BackendRef, ClientId, ObservedClient, VpnClient};
use crate::sync::{ClientSource, SourceListing};

pub fn headscale_node(node_id: u64, name: &str, ip: &str) -> ObservedClient {
    ObservedClient {
        source: BackendRef::Headscale { node_id },
        name: name.to_owned(),
        ip: ip.parse().unwrap_or_else(|_| panic!("bad test address {ip}")),
        online: true,
    }
}

pub fn wireguard_peer(public_key: &str, name: &str, ip: &str) -> ObservedClient {
    ObservedClient {
        source: BackendRef::WireGuard {
            public_key: public_key.to_owned(),
        },
        name: name.to_owned(),
        ip: ip.parse().unwrap_or_else(|_| panic!("bad test address {ip}")),
        online: true,
    }
}

// ── Source ──────────────────────────────────────────────────────────

/// A backend whose client list the test controls.
pub struct StaticSource {
    backend: Backend,
    clients: Mutex<Vec<ObservedClient>>,
    unaddressed: Mutex<Vec<BackendRef>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(backend: Backend, clients: Vec<ObservedClient>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            clients: Mutex::new(clients),
            unaddressed: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_clients(&self, clients: Vec<ObservedClient>) {
        *self.clients.lock().unwrap_or_else(PoisonError::into_inner) = clients;
    }

    /// Clients the backend lists without a usable address.
    pub fn set_unaddressed(&self, sources: Vec<BackendRef>) {
        *self.unaddressed.lock().unwrap_or_else(PoisonError::into_inner) = sources;
    }

    /// Make every following fetch fail with `reason`, or succeed again
    /// with `None`.
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_owned);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClientSource for StaticSource {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn fetch(&self) -> BoxFuture<'_, Result<SourceListing, CoreError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let failure = self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(reason) = failure {
                return Err(CoreError::SyncTransientFailure {
                    backend: self.backend.to_string(),
                    reason,
                });
            }
            Ok(SourceListing {
                clients: self
                    .clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
                unaddressed: self
                    .unaddressed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            })
        }
        .boxed()
    }
}

// ── Applier ─────────────────────────────────────────────────────────

/// Records every submitted document; can be told to reject or stall.
#[derive(Default)]
pub struct RecordingApplier {
    submitted: Mutex<Vec<EnforcementDocument>>,
    reject: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl RecordingApplier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_with(&self, reason: Option<&str>) {
        *self.reject.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_owned);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<EnforcementDocument> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent document sent to `backend`.
    pub fn last_for(&self, backend: Backend) -> Option<EnforcementDocument> {
        self.submitted()
            .into_iter()
            .rev()
            .find(|d| d.backend == backend)
    }
}

impl EnforcementApplier for RecordingApplier {
    fn submit<'a>(
        &'a self,
        document: &'a EnforcementDocument,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let reject = self
                .reject
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(reason) = reject {
                return Err(CoreError::ApplyRejected {
                    backend: document.backend.to_string(),
                    reason,
                });
            }
            self.submitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(document.clone());
            Ok(())
        }
        .boxed()
    }
}

// ── DNS ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingDns {
    changes: Mutex<Vec<(ClientId, bool)>>,
    fail: AtomicBool,
}

impl RecordingDns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn changes(&self) -> Vec<(ClientId, bool)> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DnsRewriter for RecordingDns {
    fn set_rewrite<'a>(
        &'a self,
        client: &'a VpnClient,
        enabled: bool,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::Api {
                    message: "dns webhook unavailable".into(),
                    status: Some(503),
                });
            }
            self.changes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((client.id, enabled));
            Ok(())
        }
        .boxed()
    }
}

// ── Bundle ──────────────────────────────────────────────────────────

/// Handles to the in-memory collaborators wired into an engine.
pub struct Harness {
    pub headscale: Arc<StaticSource>,
    pub wireguard: Arc<StaticSource>,
    pub applier: Arc<RecordingApplier>,
    pub dns: Arc<RecordingDns>,
}

impl Harness {
    pub fn new(headscale: Vec<ObservedClient>, wireguard: Vec<ObservedClient>) -> Self {
        Self {
            headscale: StaticSource::new(Backend::Headscale, headscale),
            wireguard: StaticSource::new(Backend::WireGuard, wireguard),
            applier: RecordingApplier::new(),
            dns: RecordingDns::new(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            sources: vec![
                Arc::clone(&self.headscale) as Arc<dyn ClientSource>,
                Arc::clone(&self.wireguard) as Arc<dyn ClientSource>,
            ],
            applier: Arc::clone(&self.applier) as Arc<dyn EnforcementApplier>,
            dns: Some(Arc::clone(&self.dns) as Arc<dyn DnsRewriter>),
        }
    }
}
