// ── Rule document rendering ──
//
// Turns resolved edges into the document each enforcement layer accepts.
// An edge lands in the document of every backend either endpoint lives on,
// since both sides may need to pass the traffic. Rendering is
// deterministic: equal input gives byte-identical documents.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::net::IpAddr;

use serde::Serialize;
use tracing::debug;

use crate::model::{Backend, ClientId, VpnClient};
use crate::resolver::{Reachability, ResolverInput};

/// Table that holds every rule meshgate manages on the WireGuard host.
pub const NFT_TABLE: &str = "meshgate";

/// How a document's body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentFormat {
    /// Headscale ACL policy (JSON).
    HeadscalePolicy,
    /// nftables ruleset (text, loaded atomically with `nft -f`).
    Nftables,
}

/// One complete rule document for one enforcement layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementDocument {
    pub backend: Backend,
    pub format: DocumentFormat,
    /// Number of directed edges the document grants.
    pub edges: usize,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Backends to render for; each gets a document even with no edges.
    pub backends: Vec<Backend>,
    /// Tunnel interface on the WireGuard host.
    pub wg_interface: String,
}

/// Render one document per configured backend.
pub fn render(
    input: &ResolverInput,
    reach: &Reachability,
    options: &RenderOptions,
) -> Vec<EnforcementDocument> {
    let clients: HashMap<ClientId, &VpnClient> =
        input.clients.iter().map(|c| (c.id, c.as_ref())).collect();

    options
        .backends
        .iter()
        .map(|&backend| {
            let edges: Vec<(&VpnClient, &VpnClient)> = reach
                .edges()
                .filter_map(|(a, b)| Some((*clients.get(&a)?, *clients.get(&b)?)))
                .filter(|(a, b)| a.backend() == backend || b.backend() == backend)
                .collect();
            match backend {
                Backend::Headscale => headscale_policy(&edges),
                Backend::WireGuard => nftables_ruleset(&edges, &options.wg_interface),
            }
        })
        .collect()
}

// ── Headscale policy ────────────────────────────────────────────────

#[derive(Serialize)]
struct HeadscalePolicy {
    hosts: BTreeMap<String, String>,
    acls: Vec<HeadscaleAcl>,
}

#[derive(Serialize)]
struct HeadscaleAcl {
    action: &'static str,
    src: Vec<String>,
    dst: Vec<String>,
}

fn host_alias(id: ClientId) -> String {
    format!("c-{id}")
}

fn host_prefix(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// One `accept` entry per source, listing every destination on all ports.
/// Headscale denies anything not accepted.
fn headscale_policy(edges: &[(&VpnClient, &VpnClient)]) -> EnforcementDocument {
    let mut hosts = BTreeMap::new();
    let mut grants: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (a, b) in edges {
        hosts.insert(host_alias(a.id), host_prefix(a.ip));
        hosts.insert(host_alias(b.id), host_prefix(b.ip));
        grants
            .entry(host_alias(a.id))
            .or_default()
            .insert(format!("{}:*", host_alias(b.id)));
    }

    let policy = HeadscalePolicy {
        hosts,
        acls: grants
            .into_iter()
            .map(|(src, dst)| HeadscaleAcl {
                action: "accept",
                src: vec![src],
                dst: dst.into_iter().collect(),
            })
            .collect(),
    };

    EnforcementDocument {
        backend: Backend::Headscale,
        format: DocumentFormat::HeadscalePolicy,
        edges: edges.len(),
        // Serializing plain maps and strings cannot fail.
        body: serde_json::to_string_pretty(&policy).unwrap_or_default(),
    }
}

// ── WireGuard nftables ruleset ──────────────────────────────────────

/// A forward-chain table that accepts each edge by address and drops all
/// other tunnel traffic. The leading `table`/`delete table` pair makes the
/// load replace the previous table in one transaction.
///
/// A rule matches one address family, so an edge between an IPv4 and an
/// IPv6 client cannot be expressed. Such edges are left out of the edge
/// count and listed as comments.
fn nftables_ruleset(edges: &[(&VpnClient, &VpnClient)], interface: &str) -> EnforcementDocument {
    let (pairs, skipped): (BTreeSet<(IpAddr, IpAddr)>, BTreeSet<(IpAddr, IpAddr)>) = edges
        .iter()
        .map(|(a, b)| (a.ip, b.ip))
        .partition(|(a, b)| a.is_ipv4() == b.is_ipv4());
    if !skipped.is_empty() {
        debug!(
            skipped = skipped.len(),
            "edges between address families left out of the nftables ruleset"
        );
    }

    let mut body = String::new();
    let _ = writeln!(body, "#!/usr/sbin/nft -f");
    let _ = writeln!(body, "# meshgate reachability: {} edges", pairs.len());
    for (src, dst) in &skipped {
        let _ = writeln!(body, "# skipped {src} -> {dst}: address families differ");
    }
    let _ = writeln!(body, "table inet {NFT_TABLE}");
    let _ = writeln!(body, "delete table inet {NFT_TABLE}");
    let _ = writeln!(body, "table inet {NFT_TABLE} {{");
    let _ = writeln!(body, "\tchain forward {{");
    let _ = writeln!(
        body,
        "\t\ttype filter hook forward priority filter; policy accept;"
    );
    let _ = writeln!(body, "\t\tct state established,related accept");
    for (src, dst) in &pairs {
        let family = if src.is_ipv4() { "ip" } else { "ip6" };
        let _ = writeln!(body, "\t\t{family} saddr {src} {family} daddr {dst} accept");
    }
    let _ = writeln!(body, "\t\tiifname \"{interface}\" drop");
    let _ = writeln!(body, "\t\toifname \"{interface}\" drop");
    let _ = writeln!(body, "\t}}");
    let _ = writeln!(body, "}}");

    EnforcementDocument {
        backend: Backend::WireGuard,
        format: DocumentFormat::Nftables,
        edges: pairs.len(),
        body,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{AclRule, BackendRef, Capabilities, ObservedClient, PolicyMode, RuleSet};
    use crate::resolver::resolve;

    fn client(source: BackendRef, ip: &str, mode: PolicyMode) -> VpnClient {
        let mut c = VpnClient::discovered(
            ObservedClient {
                source,
                name: "c".into(),
                ip: ip.parse().unwrap(),
                online: true,
            },
            Utc::now(),
        );
        c.acl_policy = mode;
        c
    }

    fn options() -> RenderOptions {
        RenderOptions {
            backends: vec![Backend::Headscale, Backend::WireGuard],
            wg_interface: "wg0".into(),
        }
    }

    fn input(clients: Vec<VpnClient>, rules: Vec<RuleSet>) -> ResolverInput {
        ResolverInput {
            clients: Arc::new(clients.into_iter().map(Arc::new).collect()),
            rules: Arc::new(rules.into_iter().map(Arc::new).collect()),
            capabilities: Capabilities::default(),
            revision: 1,
        }
    }

    #[test]
    fn no_edges_renders_deny_everything() {
        let i = input(Vec::new(), Vec::new());
        let docs = render(&i, &resolve(&i), &options());
        assert_eq!(docs.len(), 2);

        let policy: serde_json::Value = serde_json::from_str(&docs[0].body).unwrap();
        assert_eq!(policy, serde_json::json!({ "hosts": {}, "acls": [] }));

        assert!(!docs[1].body.contains("saddr"));
        assert!(docs[1].body.contains("iifname \"wg0\" drop"));
        assert_eq!(docs[1].edges, 0);
    }

    #[test]
    fn cross_backend_edge_lands_in_both_documents() {
        let a = client(BackendRef::Headscale { node_id: 1 }, "100.64.0.1", PolicyMode::Selected);
        let b = client(
            BackendRef::WireGuard {
                public_key: "k".into(),
            },
            "10.8.0.2",
            PolicyMode::Selected,
        );
        let rules = vec![RuleSet {
            owner: a.id,
            rules: vec![AclRule::to(b.id)],
        }];
        let (a_id, b_id) = (a.id, b.id);
        let i = input(vec![a, b], rules);
        let docs = render(&i, &resolve(&i), &options());

        let policy: serde_json::Value = serde_json::from_str(&docs[0].body).unwrap();
        assert_eq!(
            policy["acls"],
            serde_json::json!([{
                "action": "accept",
                "src": [format!("c-{a_id}")],
                "dst": [format!("c-{b_id}:*")],
            }])
        );
        assert_eq!(policy["hosts"][format!("c-{b_id}")], "10.8.0.2/32");

        assert!(
            docs[1]
                .body
                .contains("ip saddr 100.64.0.1 ip daddr 10.8.0.2 accept")
        );
        assert!(!docs[1].body.contains("ip saddr 10.8.0.2"));
    }

    #[test]
    fn same_backend_edge_only_in_its_own_document() {
        let a = client(BackendRef::Headscale { node_id: 1 }, "100.64.0.1", PolicyMode::AllowAll);
        let b = client(BackendRef::Headscale { node_id: 2 }, "100.64.0.2", PolicyMode::Selected);
        let i = input(vec![a, b], Vec::new());
        let docs = render(&i, &resolve(&i), &options());
        // a opens itself to b, b reaches a through the advertiser rule
        assert_eq!(docs[0].edges, 2);
        assert_eq!(docs[1].edges, 0);
        assert!(!docs[1].body.contains("100.64.0."));
    }

    #[test]
    fn mixed_family_edges_are_listed_not_counted_in_nftables() {
        let a = client(BackendRef::Headscale { node_id: 1 }, "fd7a::1", PolicyMode::AllowAll);
        let b = client(
            BackendRef::WireGuard {
                public_key: "k".into(),
            },
            "10.8.0.2",
            PolicyMode::AllowAll,
        );
        let i = input(vec![a, b], Vec::new());
        let docs = render(&i, &resolve(&i), &options());

        assert_eq!(docs[0].edges, 2);
        assert_eq!(docs[1].edges, 0);
        assert!(docs[1].body.contains("# meshgate reachability: 0 edges"));
        assert!(docs[1].body.contains("# skipped 10.8.0.2 -> fd7a::1: address families differ"));
        assert!(docs[1].body.contains("# skipped fd7a::1 -> 10.8.0.2: address families differ"));
        assert!(!docs[1].body.contains("saddr"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let clients: Vec<VpnClient> = (1..=5)
            .map(|n| {
                client(
                    BackendRef::Headscale { node_id: n },
                    &format!("100.64.0.{n}"),
                    PolicyMode::AllowAll,
                )
            })
            .collect();
        let i = input(clients, Vec::new());
        let first = render(&i, &resolve(&i), &options());
        let second = render(&i, &resolve(&i), &options());
        assert_eq!(first, second);
        assert_eq!(first[0].edges, 20);
    }
}
