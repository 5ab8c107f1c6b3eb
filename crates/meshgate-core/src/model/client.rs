// ── Client domain types ──

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{Backend, BackendRef, ClientId};
use super::policy::PolicyMode;

/// A client as one backend reports it during sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedClient {
    pub source: BackendRef,
    pub name: String,
    pub ip: IpAddr,
    pub online: bool,
}

/// The canonical client record.
///
/// Backend-owned fields (`source`, `name`, `ip`, `online`) are refreshed on
/// every sync. User-owned fields (`acl_policy`, `has_dns`) are only ever
/// written through the policy store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnClient {
    pub id: ClientId,
    pub source: BackendRef,
    pub name: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub acl_policy: PolicyMode,
    #[serde(default, rename = "hasDNS")]
    pub has_dns: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Consecutive successful syncs in which the client was not reported.
    #[serde(default)]
    pub missed_syncs: u8,
}

impl VpnClient {
    /// A freshly discovered client with default user-owned state.
    pub fn discovered(observed: ObservedClient, now: DateTime<Utc>) -> Self {
        Self {
            id: ClientId::generate(),
            source: observed.source,
            name: observed.name,
            ip: observed.ip,
            online: observed.online,
            acl_policy: PolicyMode::default(),
            has_dns: false,
            first_seen: now,
            last_seen: now,
            missed_syncs: 0,
        }
    }

    pub fn backend(&self) -> Backend {
        self.source.backend()
    }

    pub fn external_id(&self) -> String {
        self.source.external_id()
    }

    /// Copy of `self` with backend-owned fields taken from `observed`.
    pub(crate) fn refreshed(&self, observed: &ObservedClient, now: DateTime<Utc>) -> Self {
        Self {
            source: observed.source.clone(),
            name: observed.name.clone(),
            ip: observed.ip,
            online: observed.online,
            last_seen: now,
            missed_syncs: 0,
            ..self.clone()
        }
    }
}
