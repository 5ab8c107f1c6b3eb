// ── Presentation views ──
//
// Flat, serializable shapes shared by the HTTP surface and the CLI. They
// are derived from the canonical model and never stored.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::client::VpnClient;
use super::ids::{Backend, ClientId};
use super::policy::{AclRule, PolicyMode};

/// A client as the management surface shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    pub id: ClientId,
    pub backend: Backend,
    pub external_id: String,
    pub name: String,
    pub ip: IpAddr,
    pub online: bool,
    pub acl_policy: PolicyMode,
    #[serde(rename = "hasDNS")]
    pub has_dns: bool,
    pub last_seen: DateTime<Utc>,
}

impl From<&VpnClient> for ClientView {
    fn from(c: &VpnClient) -> Self {
        Self {
            id: c.id,
            backend: c.backend(),
            external_id: c.external_id(),
            name: c.name.clone(),
            ip: c.ip,
            online: c.online,
            acl_policy: c.acl_policy,
            has_dns: c.has_dns,
            last_seen: c.last_seen,
        }
    }
}

/// Why a stored rule does or does not contribute an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleState {
    /// Both ends are `selected`; the rule grants reachability.
    Active,
    /// The owner is not `selected`, so its rules are dormant.
    OwnerNotSelected,
    /// The target blocks everything; the rule is shown but disabled.
    TargetBlocksAll,
    /// The target allows everything; the rule is redundant.
    TargetAllowsAll,
    /// The endpoints sit on different backends and the bridge is down.
    BridgeUnavailable,
    /// The target no longer exists.
    TargetMissing,
}

impl RuleState {
    pub fn is_actionable(self) -> bool {
        self == Self::Active
    }
}

/// A stored rule annotated for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
    pub target_id: ClientId,
    pub target_name: Option<String>,
    pub bidirectional: bool,
    pub actionable: bool,
    pub state: RuleState,
}

impl RuleView {
    pub fn rule(&self) -> AclRule {
        AclRule {
            target_id: self.target_id,
            bidirectional: self.bidirectional,
        }
    }
}

/// Detail view of one client: the record plus its annotated rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDetail {
    pub client: ClientView,
    pub rules: Vec<RuleView>,
    #[serde(rename = "hasDNS")]
    pub has_dns: bool,
}

/// Effective reachability around one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReachView {
    pub client_id: ClientId,
    /// Clients this one may open connections to.
    pub can_reach: Vec<ClientId>,
    /// Clients that may open connections to this one.
    pub reachable_from: Vec<ClientId>,
}
