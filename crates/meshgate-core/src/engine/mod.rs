// ── Engine facade ──
//
// Owns the registry, the policy store, and the sync and apply machinery,
// and manages their lifecycle: restore persisted state, run the initial
// sync, then keep the registry fresh in the background until shutdown.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meshgate_api::{
    DnsWebhookClient, HeadscaleClient, TlsMode, TransportConfig, WgAgentClient,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apply::{
    ApplyEngine, EnforcementApplier, EnforcementDocument, HttpEnforcementApplier, RenderOptions,
};
use crate::config::{EngineConfig, TlsVerification};
use crate::dns::{DnsRewriter, WebhookDnsRewriter};
use crate::error::CoreError;
use crate::model::{
    AclRule, ApplyStatus, Backend, Capabilities, ClientDetail, ClientId, ClientView, EngineStatus,
    PolicyMode, ReachView, RuleView, SyncStatus, VpnClient,
};
use crate::persist::{PersistedState, STATE_VERSION, StateFile};
use crate::resolver::{self, Reachability, ResolverInput};
use crate::store::{ApplyTracker, ClientRegistry, PolicyStore};
use crate::sync::{ClientSource, HeadscaleSource, SyncCoordinator, SyncReport, WireGuardSource};

/// Pending topology notifications beyond this collapse into the one
/// already queued.
const TOPOLOGY_QUEUE: usize = 1;

// ── Collaborators ────────────────────────────────────────────────

/// The external systems an engine talks to.
pub struct Collaborators {
    pub sources: Vec<Arc<dyn ClientSource>>,
    pub applier: Arc<dyn EnforcementApplier>,
    pub dns: Option<Arc<dyn DnsRewriter>>,
}

impl Collaborators {
    /// Build HTTP-backed collaborators for every configured backend.
    pub fn from_config(config: &EngineConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_to_transport(&config.tls),
            timeout: config.timeout,
        };

        let headscale = config
            .headscale
            .as_ref()
            .map(|hs| HeadscaleClient::from_api_key(hs.url.as_str(), &hs.api_key, &transport))
            .transpose()?;
        let wireguard = config
            .wireguard
            .as_ref()
            .map(|wg| match &wg.api_key {
                Some(key) => WgAgentClient::from_api_key(wg.url.as_str(), key, &transport),
                None => WgAgentClient::anonymous(wg.url.as_str(), &transport),
            })
            .transpose()?;
        let dns = config
            .dns_webhook
            .as_ref()
            .map(|d| DnsWebhookClient::new(d.url.as_str(), d.token.as_ref(), &transport))
            .transpose()?
            .map(|client| Arc::new(WebhookDnsRewriter::new(client)) as Arc<dyn DnsRewriter>);

        let mut sources: Vec<Arc<dyn ClientSource>> = Vec::new();
        if let Some(client) = &headscale {
            sources.push(Arc::new(HeadscaleSource::new(client.clone())));
        }
        if let Some(client) = &wireguard {
            sources.push(Arc::new(WireGuardSource::new(client.clone())));
        }

        Ok(Self {
            sources,
            applier: Arc::new(HttpEnforcementApplier::new(
                headscale,
                wireguard,
                config.timeout.as_secs(),
            )),
            dns,
        })
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}

// ── Engine ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Reads are served from
/// in-memory snapshots; only `sync`, `apply` and the DNS toggle reach an
/// external system.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<ClientRegistry>,
    policy: Arc<PolicyStore>,
    tracker: Arc<ApplyTracker>,
    capabilities: watch::Sender<Capabilities>,
    sync: SyncCoordinator,
    apply: ApplyEngine,
    dns: Option<Arc<dyn DnsRewriter>>,
    state: Option<StateFile>,
    cancel: CancellationToken,
    /// Child token for background tasks; cancelled on shutdown.
    cancel_child: CancellationToken,
    topology_tx: mpsc::Sender<Option<Backend>>,
    topology_rx: Mutex<Option<mpsc::Receiver<Option<Backend>>>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Create an engine talking to the backends named in `config`. Does
    /// not touch the network; call [`start()`](Self::start).
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(config, collaborators))
    }

    /// Create an engine over explicit collaborators.
    pub fn with_collaborators(config: EngineConfig, collaborators: Collaborators) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let tracker = Arc::new(ApplyTracker::new());
        let policy = Arc::new(PolicyStore::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
        ));
        let (capabilities, capabilities_rx) = watch::channel(Capabilities {
            bridge_available: config.bridge_available,
        });

        let sync = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&policy),
            Arc::clone(&tracker),
            collaborators.sources,
            config.timeout,
        );
        let apply = ApplyEngine::new(
            Arc::clone(&policy),
            Arc::clone(&tracker),
            capabilities_rx,
            collaborators.applier,
            RenderOptions {
                backends: sync.backends(),
                wg_interface: config.wireguard_interface().to_owned(),
            },
            config.timeout,
        );

        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();
        let (topology_tx, topology_rx) = mpsc::channel(TOPOLOGY_QUEUE);
        let state = config.state_path.clone().map(StateFile::new);

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                policy,
                tracker,
                capabilities,
                sync,
                apply,
                dns: collaborators.dns,
                state,
                cancel,
                cancel_child,
                topology_tx,
                topology_rx: Mutex::new(Some(topology_rx)),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Restore persisted state, run the first sync, and spawn the periodic
    /// sync and topology listener.
    ///
    /// A failed first sync is not fatal: the engine serves the restored
    /// state and reports the sync as stale.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.restore_state().await?;

        match self.sync().await {
            Ok(_) => {}
            Err(e @ CoreError::Config { .. }) => return Err(e),
            Err(e) => warn!(error = %e, "initial sync failed; serving persisted state"),
        }

        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.topology_rx.lock().await.take() {
            let engine = self.clone();
            let cancel = self.inner.cancel_child.clone();
            handles.push(tokio::spawn(topology_task(engine, rx, cancel)));
        }

        let interval = self.inner.config.sync_interval;
        if !interval.is_zero() {
            let engine = self.clone();
            let cancel = self.inner.cancel_child.clone();
            handles.push(tokio::spawn(sync_task(engine, interval, cancel)));
        }

        info!(
            clients = self.inner.registry.len(),
            backends = ?self.backends(),
            "engine started"
        );
        Ok(())
    }

    /// Stop background tasks and persist the final state.
    pub async fn shutdown(&self) {
        self.inner.cancel_child.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        if let Err(e) = self.save_state().await {
            warn!(error = %e, "failed to persist state on shutdown");
        }
        debug!("engine stopped");
    }

    /// One-shot: restore, sync, run closure, persist.
    ///
    /// For single CLI invocations: no background tasks, and a failed sync
    /// is an error rather than a warning.
    pub async fn oneshot<F, Fut, T>(config: EngineConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Engine) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let engine = Engine::new(config)?;
        engine.restore_state().await?;
        engine.sync().await?;
        let result = f(engine.clone()).await;
        engine.shutdown().await;
        result
    }

    // ── Reads ────────────────────────────────────────────────────

    /// All clients, ordered by id.
    pub fn clients(&self) -> Arc<Vec<Arc<VpnClient>>> {
        self.inner.registry.list()
    }

    pub fn client_views(&self) -> Vec<ClientView> {
        self.clients().iter().map(|c| ClientView::from(c.as_ref())).collect()
    }

    pub fn client(&self, id: &ClientId) -> Result<Arc<VpnClient>, CoreError> {
        self.inner.registry.require(id)
    }

    pub fn clients_by_ip(&self, ip: IpAddr) -> Vec<Arc<VpnClient>> {
        self.inner.registry.list_by_ip(ip)
    }

    /// Resolve an operator-supplied identifier: a client id, an IP
    /// address, a backend id, or an unambiguous name.
    pub fn find_client(&self, needle: &str) -> Result<Arc<VpnClient>, CoreError> {
        let needle = needle.trim();
        if let Ok(id) = needle.parse::<ClientId>() {
            return self.client(&id);
        }
        if let Ok(ip) = needle.parse::<IpAddr>() {
            return self
                .clients_by_ip(ip)
                .into_iter()
                .next()
                .ok_or_else(|| CoreError::ClientNotFound {
                    identifier: needle.to_owned(),
                });
        }

        let clients = self.clients();
        if let Some(c) = clients.iter().find(|c| c.external_id() == needle) {
            return Ok(Arc::clone(c));
        }
        let named: Vec<&Arc<VpnClient>> = clients
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(needle))
            .collect();
        match named.as_slice() {
            [one] => Ok(Arc::clone(one)),
            [] => Err(CoreError::ClientNotFound {
                identifier: needle.to_owned(),
            }),
            many => Err(CoreError::ValidationFailed {
                message: format!(
                    "'{needle}' matches {} clients; use an id or address",
                    many.len()
                ),
            }),
        }
    }

    /// Stored rules of a client, kept across mode switches.
    pub fn rules(&self, id: &ClientId) -> Result<Vec<AclRule>, CoreError> {
        self.inner.registry.require(id)?;
        Ok(self.inner.policy.rules_for(id))
    }

    /// A client with each stored rule annotated by whether it currently
    /// grants anything.
    pub fn client_detail(&self, id: &ClientId) -> Result<ClientDetail, CoreError> {
        let client = self.client(id)?;
        let input = self.resolver_input();
        let rules = self
            .inner
            .policy
            .rules_for(id)
            .iter()
            .map(|rule| {
                let state = resolver::rule_state(&input, &client, rule);
                RuleView {
                    target_id: rule.target_id,
                    target_name: input.client(&rule.target_id).map(|t| t.name.clone()),
                    bidirectional: rule.bidirectional,
                    actionable: state.is_actionable(),
                    state,
                }
            })
            .collect();
        Ok(ClientDetail {
            client: ClientView::from(client.as_ref()),
            rules,
            has_dns: client.has_dns,
        })
    }

    /// Clients that `id` may pick as rule targets.
    pub fn selectable_targets(&self, id: &ClientId) -> Result<Vec<Arc<VpnClient>>, CoreError> {
        let client = self.client(id)?;
        let input = self.resolver_input();
        Ok(resolver::selectable_targets(&input, &client)
            .into_iter()
            .filter_map(|t| input.client(&t).cloned())
            .collect())
    }

    /// Snapshot of everything the resolver reads.
    pub fn resolver_input(&self) -> ResolverInput {
        self.inner.policy.capture(self.capabilities())
    }

    pub fn reachability(&self) -> Reachability {
        resolver::resolve(&self.resolver_input())
    }

    pub fn can_reach(&self, from: ClientId, to: ClientId) -> bool {
        self.reachability().can_reach(from, to)
    }

    pub fn reach(&self, id: &ClientId) -> Result<ReachView, CoreError> {
        self.inner.registry.require(id)?;
        let reach = self.reachability();
        Ok(ReachView {
            client_id: *id,
            can_reach: reach.reachable_from(*id),
            reachable_from: reach.reachers_of(*id),
        })
    }

    /// Documents an apply would submit now, without submitting them.
    pub fn preview(&self) -> Vec<EnforcementDocument> {
        self.inner.apply.preview()
    }

    pub fn backends(&self) -> Vec<Backend> {
        self.inner.sync.backends()
    }

    // ── Status ───────────────────────────────────────────────────

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            clients: self.inner.registry.len(),
            backends: self.backends(),
            capabilities: self.capabilities(),
            sync: self.sync_status(),
            apply: self.apply_status(),
            applying: self.inner.apply.is_running(),
        }
    }

    pub fn apply_status(&self) -> ApplyStatus {
        self.inner.apply.status()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.sync.status()
    }

    pub fn last_sync_report(&self) -> Option<SyncReport> {
        self.inner.sync.last_report()
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.inner.capabilities.borrow()
    }

    pub fn subscribe_clients(&self) -> watch::Receiver<Arc<Vec<Arc<VpnClient>>>> {
        self.inner.registry.subscribe()
    }

    pub fn subscribe_apply_status(&self) -> watch::Receiver<ApplyStatus> {
        self.inner.tracker.subscribe()
    }

    pub fn subscribe_sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.sync.subscribe()
    }

    // ── Policy writes ────────────────────────────────────────────
    //
    // Each write is validated and stored, then persisted. A failed save
    // returns `Persistence`; the change stays in memory and marked pending
    // but will not survive a restart. Nothing is pushed to enforcement
    // until `apply()`.

    pub async fn set_policy(
        &self,
        id: &ClientId,
        mode: PolicyMode,
    ) -> Result<Arc<VpnClient>, CoreError> {
        let client = self.inner.policy.set_policy(id, mode)?;
        self.save_state().await?;
        Ok(client)
    }

    pub async fn set_rules(&self, id: &ClientId, rules: Vec<AclRule>) -> Result<(), CoreError> {
        self.inner.policy.set_rules(id, rules)?;
        self.save_state().await
    }

    /// Replace mode and rules in one step.
    pub async fn set_acl(
        &self,
        id: &ClientId,
        mode: PolicyMode,
        rules: Vec<AclRule>,
    ) -> Result<(), CoreError> {
        self.inner.policy.set_acl(id, mode, rules)?;
        self.save_state().await
    }

    /// Flip the bidirectional flag on one rule; `None` if there is no such
    /// rule.
    pub async fn toggle_bidirectional(
        &self,
        owner: &ClientId,
        target: &ClientId,
    ) -> Result<Option<bool>, CoreError> {
        let flipped = self.inner.policy.toggle_bidirectional(owner, target)?;
        if flipped.is_some() {
            self.save_state().await?;
        }
        Ok(flipped)
    }

    /// Toggle DNS rewriting for a client. The rewrite owner is told first;
    /// if it refuses, the flag is left unchanged.
    pub async fn set_dns(&self, id: &ClientId, enabled: bool) -> Result<Arc<VpnClient>, CoreError> {
        let client = self.client(id)?;
        if client.has_dns == enabled {
            return Ok(client);
        }
        if let Some(dns) = &self.inner.dns {
            dns.set_rewrite(&client, enabled).await?;
        }
        let updated = self.inner.policy.set_dns(id, enabled)?;
        self.save_state().await?;
        Ok(updated)
    }

    /// Record whether the cross-network bridge is up.
    pub fn set_bridge_available(&self, available: bool) {
        let changed = self.inner.capabilities.send_if_modified(|caps| {
            let changed = caps.bridge_available != available;
            caps.bridge_available = available;
            changed
        });
        if changed {
            info!(available, "bridge availability changed");
            self.inner.tracker.mark_pending();
        }
    }

    // ── External I/O ─────────────────────────────────────────────

    /// Refresh the registry from every backend.
    pub async fn sync(&self) -> Result<SyncReport, CoreError> {
        self.sync_with(&self.inner.cancel.child_token()).await
    }

    /// [`sync()`](Self::sync) with a caller-supplied cancellation signal.
    pub async fn sync_with(&self, cancel: &CancellationToken) -> Result<SyncReport, CoreError> {
        let report = self.inner.sync.sync(cancel).await?;
        if report.membership_changed() {
            self.persist().await;
        }
        Ok(report)
    }

    /// Push the current policy to every enforcement layer.
    pub async fn apply(&self) -> Result<ApplyStatus, CoreError> {
        self.apply_with(&self.inner.cancel.child_token()).await
    }

    /// [`apply()`](Self::apply) with a caller-supplied cancellation signal.
    pub async fn apply_with(&self, cancel: &CancellationToken) -> Result<ApplyStatus, CoreError> {
        let result = self.inner.apply.apply(cancel).await;
        self.persist().await;
        result
    }

    /// A backend reported a topology change. Queues a sync on the
    /// background listener; notifications arriving while one is queued
    /// collapse into it.
    pub fn notify_topology_changed(&self, backend: Option<Backend>) {
        match self.inner.topology_tx.try_send(backend) {
            Ok(()) => debug!(?backend, "topology change queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(?backend, "topology change coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("topology listener stopped; change ignored");
            }
        }
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Write clients, rules and apply status to the state file, if one is
    /// configured.
    pub async fn save_state(&self) -> Result<(), CoreError> {
        let Some(file) = &self.inner.state else {
            return Ok(());
        };
        let state = PersistedState {
            version: STATE_VERSION,
            saved_at: Utc::now(),
            clients: self
                .inner
                .registry
                .list()
                .iter()
                .map(|c| c.as_ref().clone())
                .collect(),
            rules: self
                .inner
                .policy
                .rule_sets()
                .iter()
                .map(|s| s.as_ref().clone())
                .collect(),
            apply_status: Some(self.inner.tracker.snapshot()),
        };
        file.save(&state).await
    }

    async fn restore_state(&self) -> Result<(), CoreError> {
        let Some(file) = &self.inner.state else {
            return Ok(());
        };
        let Some(state) = file.load().await? else {
            debug!(path = %file.path().display(), "no saved state");
            return Ok(());
        };
        let restored = self.inner.registry.restore(state.clients);
        self.inner.policy.restore(state.rules);
        if let Some(status) = state.apply_status {
            self.inner.tracker.restore(status);
        }
        info!(clients = restored, path = %file.path().display(), "state restored");
        Ok(())
    }

    /// Best-effort save after a sync or apply, whose outcome is reported
    /// on its own; a failure here is logged and retried on the next write.
    async fn persist(&self) {
        if let Err(e) = self.save_state().await {
            warn!(error = %e, "failed to persist state");
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Periodically sync the registry from the backends.
async fn sync_task(engine: Engine, interval: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = engine.sync_with(&cancel).await {
                    warn!(error = %e, "periodic sync failed");
                }
            }
        }
    }
}

/// Run a sync for each queued topology notification.
async fn topology_task(
    engine: Engine,
    mut rx: mpsc::Receiver<Option<Backend>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(backend) = event else { break };
                debug!(?backend, "topology change; syncing");
                if let Err(e) = engine.sync_with(&cancel).await {
                    warn!(error = %e, "sync after topology change failed");
                }
            }
        }
    }
}
