// ── Client registry ──
//
// The canonical set of clients across both backends. Three invariants hold
// after every write:
//   - one client per `BackendRef`
//   - one client per IP address
//   - a client's `ClientId` never changes

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::collection::EntityCollection;
use crate::error::CoreError;
use crate::model::{BackendRef, ClientId, ObservedClient, PolicyMode, VpnClient};

/// What an upsert did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(ClientId),
    Updated { id: ClientId, readdressed: bool },
}

impl UpsertOutcome {
    pub fn id(&self) -> ClientId {
        match self {
            Self::Inserted(id) | Self::Updated { id, .. } => *id,
        }
    }
}

pub struct ClientRegistry {
    clients: EntityCollection<ClientId, VpnClient>,
    by_source: DashMap<BackendRef, ClientId>,
    by_ip: DashMap<IpAddr, ClientId>,
    /// Serializes writes that touch the secondary indexes. User-owned field
    /// updates go through `EntityCollection::update` and skip it.
    writer: Mutex<()>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: EntityCollection::new(),
            by_source: DashMap::new(),
            by_ip: DashMap::new(),
            writer: Mutex::new(()),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &ClientId) -> Option<Arc<VpnClient>> {
        self.clients.get(id)
    }

    /// Like [`get`](Self::get), but absence is an error.
    pub fn require(&self, id: &ClientId) -> Result<Arc<VpnClient>, CoreError> {
        self.get(id).ok_or_else(|| CoreError::ClientNotFound {
            identifier: id.to_string(),
        })
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains(id)
    }

    pub fn by_source(&self, source: &BackendRef) -> Option<Arc<VpnClient>> {
        let id = *self.by_source.get(source)?;
        self.get(&id)
    }

    /// Clients holding `ip`. Address uniqueness keeps this to at most one.
    pub fn list_by_ip(&self, ip: IpAddr) -> Vec<Arc<VpnClient>> {
        self.by_ip
            .get(&ip)
            .map(|r| *r)
            .and_then(|id| self.get(&id))
            .into_iter()
            .collect()
    }

    /// All clients, ordered by id.
    pub fn list(&self) -> Arc<Vec<Arc<VpnClient>>> {
        self.clients.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<VpnClient>>>> {
        self.clients.subscribe()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped on every registry write.
    pub fn version(&self) -> u64 {
        self.clients.version()
    }

    // ── Backend-owned writes ─────────────────────────────────────────

    /// Insert a newly observed client or refresh the backend-owned fields
    /// of the one already bound to `observed.source`. User-owned fields are
    /// never touched.
    pub fn upsert(
        &self,
        observed: ObservedClient,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, CoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self
            .by_source
            .get(&observed.source)
            .map(|r| *r)
            .and_then(|id| self.clients.get(&id));

        self.ensure_ip_free(observed.ip, existing.as_ref().map(|c| c.id))?;

        if let Some(prev) = existing {
            let readdressed = prev.ip != observed.ip;
            self.clients
                .update(&prev.id, |c| c.refreshed(&observed, now));
            if readdressed {
                self.release_ip(prev.ip, prev.id);
                self.by_ip.insert(observed.ip, prev.id);
                debug!(client = %prev.id, from = %prev.ip, to = %observed.ip, "client re-addressed");
            }
            return Ok(UpsertOutcome::Updated {
                id: prev.id,
                readdressed,
            });
        }

        let client = VpnClient::discovered(observed, now);
        let id = client.id;
        self.by_source.insert(client.source.clone(), id);
        self.by_ip.insert(client.ip, id);
        self.clients.upsert(id, client);
        Ok(UpsertOutcome::Inserted(id))
    }

    /// Bind an existing client to a new backend identity, keeping its
    /// `ClientId` and user-owned state. Used when a client migrates between
    /// backends or is re-enrolled under a new key.
    pub fn rebind(
        &self,
        id: ClientId,
        observed: &ObservedClient,
        now: DateTime<Utc>,
    ) -> Result<Arc<VpnClient>, CoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let prev = self.require(&id)?;
        if let Some(holder) = self.by_source.get(&observed.source).map(|r| *r) {
            if holder != id {
                return Err(CoreError::ValidationFailed {
                    message: format!("{} is already bound to client {holder}", observed.source),
                });
            }
        }
        self.ensure_ip_free(observed.ip, Some(id))?;

        if self
            .by_source
            .remove_if(&prev.source, |_, owner| *owner == id)
            .is_none()
        {
            warn!(client = %id, source = %prev.source, "source index missing during rebind");
        }
        self.by_source.insert(observed.source.clone(), id);
        if prev.ip != observed.ip {
            self.release_ip(prev.ip, id);
            self.by_ip.insert(observed.ip, id);
        }

        self.clients
            .update(&id, |c| c.refreshed(observed, now))
            .ok_or_else(|| CoreError::ClientNotFound {
                identifier: id.to_string(),
            })
    }

    /// Count one more sync in which `id` was not reported and mark it
    /// offline. Returns the new miss count.
    pub fn note_absent(&self, id: &ClientId) -> Option<u8> {
        self.clients
            .update(id, |c| VpnClient {
                online: false,
                missed_syncs: c.missed_syncs.saturating_add(1),
                ..c.clone()
            })
            .map(|c| c.missed_syncs)
    }

    /// Mark a client that its backend still lists but without an address:
    /// offline, present, everything else untouched.
    pub fn note_unaddressed(&self, id: &ClientId) -> bool {
        self.clients
            .update(id, |c| VpnClient {
                online: false,
                missed_syncs: 0,
                ..c.clone()
            })
            .is_some()
    }

    /// Drop a client and its index entries.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<VpnClient>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.clients.remove(id)?;
        self.by_source.remove_if(&removed.source, |_, owner| owner == id);
        self.release_ip(removed.ip, *id);
        Some(removed)
    }

    /// Replace the registry contents with previously persisted clients.
    /// Records violating source or address uniqueness are skipped.
    pub(crate) fn restore(&self, clients: Vec<VpnClient>) -> usize {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.by_source.clear();
        self.by_ip.clear();

        let mut kept = Vec::with_capacity(clients.len());
        for client in clients {
            if self.by_source.contains_key(&client.source) || self.by_ip.contains_key(&client.ip) {
                warn!(client = %client.id, ip = %client.ip, "skipping duplicate persisted client");
                continue;
            }
            self.by_source.insert(client.source.clone(), client.id);
            self.by_ip.insert(client.ip, client.id);
            kept.push((client.id, client));
        }
        let count = kept.len();
        self.clients.replace_all(kept);
        count
    }

    // ── User-owned writes ────────────────────────────────────────────

    pub(crate) fn set_mode(
        &self,
        id: &ClientId,
        mode: PolicyMode,
    ) -> Result<Arc<VpnClient>, CoreError> {
        self.clients
            .update(id, |c| VpnClient {
                acl_policy: mode,
                ..c.clone()
            })
            .ok_or_else(|| CoreError::ClientNotFound {
                identifier: id.to_string(),
            })
    }

    pub(crate) fn set_dns(&self, id: &ClientId, enabled: bool) -> Result<Arc<VpnClient>, CoreError> {
        self.clients
            .update(id, |c| VpnClient {
                has_dns: enabled,
                ..c.clone()
            })
            .ok_or_else(|| CoreError::ClientNotFound {
                identifier: id.to_string(),
            })
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn ensure_ip_free(&self, ip: IpAddr, claimant: Option<ClientId>) -> Result<(), CoreError> {
        match self.by_ip.get(&ip).map(|r| *r) {
            Some(owner) if Some(owner) != claimant => Err(CoreError::AddressConflict { ip, owner }),
            _ => Ok(()),
        }
    }

    fn release_ip(&self, ip: IpAddr, id: ClientId) {
        self.by_ip.remove_if(&ip, |_, owner| *owner == id);
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
