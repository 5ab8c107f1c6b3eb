// ── Backend client sources ──
//
// Adapt the raw Headscale and WireGuard-agent listings into
// `ObservedClient`s. Records without a usable address cannot take part in
// any rule, but are still reported so the registry keeps them.

use std::net::IpAddr;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use meshgate_api::{HeadscaleClient, HeadscaleNode, WgAgentClient, WgPeer};
use tracing::{debug, warn};

use super::{ClientSource, SourceListing};
use crate::error::CoreError;
use crate::model::{Backend, BackendRef, ObservedClient};

/// A WireGuard peer counts as online if it completed a handshake this
/// recently.
const HANDSHAKE_FRESHNESS_SECS: i64 = 180;

/// Split observations into addressed clients and the references that had
/// no usable address.
fn listing(observations: impl Iterator<Item = Result<ObservedClient, BackendRef>>) -> SourceListing {
    let mut listing = SourceListing::default();
    for observation in observations {
        match observation {
            Ok(client) => listing.clients.push(client),
            Err(source) => listing.unaddressed.push(source),
        }
    }
    listing
}

fn transient(backend: Backend, err: &meshgate_api::Error) -> CoreError {
    CoreError::SyncTransientFailure {
        backend: backend.to_string(),
        reason: err.to_string(),
    }
}

/// Parse an address as the backends print it, with or without a prefix
/// length.
fn parse_address(raw: &str) -> Option<IpAddr> {
    let host = raw.split_once('/').map_or(raw, |(addr, _)| addr);
    host.trim().parse().ok()
}

// ── Headscale ───────────────────────────────────────────────────────

pub struct HeadscaleSource {
    client: HeadscaleClient,
}

impl HeadscaleSource {
    pub fn new(client: HeadscaleClient) -> Self {
        Self { client }
    }
}

impl ClientSource for HeadscaleSource {
    fn backend(&self) -> Backend {
        Backend::Headscale
    }

    fn fetch(&self) -> BoxFuture<'_, Result<SourceListing, CoreError>> {
        async move {
            let nodes = self
                .client
                .list_nodes()
                .await
                .map_err(|e| transient(Backend::Headscale, &e))?;
            debug!(count = nodes.len(), "headscale nodes fetched");
            Ok(listing(nodes.iter().map(observe_node)))
        }
        .boxed()
    }
}

/// A node's canonical address is its first IPv4 one, falling back to IPv6.
fn observe_node(node: &HeadscaleNode) -> Result<ObservedClient, BackendRef> {
    let source = BackendRef::Headscale { node_id: node.id };
    let addrs: Vec<IpAddr> = node
        .ip_addresses
        .iter()
        .filter_map(|a| parse_address(a))
        .collect();
    let Some(ip) = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
    else {
        warn!(node = node.id, "headscale node has no usable address; leaving it unchanged");
        return Err(source);
    };
    Ok(ObservedClient {
        source,
        name: node.display_name().to_owned(),
        ip,
        online: node.online,
    })
}

// ── WireGuard ───────────────────────────────────────────────────────

pub struct WireGuardSource {
    client: WgAgentClient,
}

impl WireGuardSource {
    pub fn new(client: WgAgentClient) -> Self {
        Self { client }
    }
}

impl ClientSource for WireGuardSource {
    fn backend(&self) -> Backend {
        Backend::WireGuard
    }

    fn fetch(&self) -> BoxFuture<'_, Result<SourceListing, CoreError>> {
        async move {
            let peers = self
                .client
                .list_peers()
                .await
                .map_err(|e| transient(Backend::WireGuard, &e))?;
            debug!(count = peers.len(), "wireguard peers fetched");
            Ok(listing(peers.iter().map(observe_peer)))
        }
        .boxed()
    }
}

fn observe_peer(peer: &WgPeer) -> Result<ObservedClient, BackendRef> {
    let source = BackendRef::WireGuard {
        public_key: peer.public_key.clone(),
    };
    let Some(ip) = parse_address(&peer.address) else {
        warn!(peer = %peer.id, address = %peer.address, "wireguard peer has no usable address; leaving it unchanged");
        return Err(source);
    };
    let fresh = peer
        .latest_handshake_at
        .is_some_and(|at| Utc::now().signed_duration_since(at).num_seconds() <= HANDSHAKE_FRESHNESS_SECS);
    Ok(ObservedClient {
        source,
        name: peer.name.clone(),
        ip,
        online: peer.enabled && fresh,
    })
}
