// ── Reachability resolver ──
//
// A pure function from (clients, rules, capabilities) to the set of
// directed edges "A may open connections to B". It never writes state and
// never performs I/O, so the same input always yields the same edges.
//
// For an ordered pair (A, B), A != B:
//   - B is `block_all`                        -> unreachable (absolute)
//   - different backends and bridge is down   -> unreachable
//   - A is `allow_all`                        -> reachable
//   - B is `allow_all`                        -> reachable, from any source
//   - A is `selected`, B is `selected`, and A has a rule to B
//                                             -> reachable
//   - A is `selected`, B is `selected`, and B has a bidirectional rule to A
//                                             -> reachable
//   - otherwise                               -> unreachable

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::model::{
    AclPolicy, AclRule, Backend, Capabilities, ClientId, PolicyMode, RuleSet, RuleState,
    VpnClient,
};

/// Everything the resolver reads, captured at one instant.
#[derive(Debug, Clone)]
pub struct ResolverInput {
    pub clients: Arc<Vec<Arc<VpnClient>>>,
    pub rules: Arc<Vec<Arc<RuleSet>>>,
    pub capabilities: Capabilities,
    /// Policy revision the snapshot was taken at.
    pub revision: u64,
}

impl ResolverInput {
    pub fn client(&self, id: &ClientId) -> Option<&Arc<VpnClient>> {
        self.clients.iter().find(|c| c.id == *id)
    }

    fn rules_of(&self) -> HashMap<ClientId, &[AclRule]> {
        self.rules
            .iter()
            .map(|set| (set.owner, set.rules.as_slice()))
            .collect()
    }
}

/// One client as the resolver sees it.
#[derive(Debug, Clone, Copy)]
struct Node<'a> {
    id: ClientId,
    backend: Backend,
    policy: AclPolicy<'a>,
}

/// The resolved set of directed edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reachability {
    edges: BTreeSet<(ClientId, ClientId)>,
}

impl Reachability {
    pub fn can_reach(&self, from: ClientId, to: ClientId) -> bool {
        self.edges.contains(&(from, to))
    }

    /// Clients `from` may open connections to, ordered by id.
    pub fn reachable_from(&self, from: ClientId) -> Vec<ClientId> {
        self.edges
            .range((from, ClientId::from(uuid::Uuid::nil()))..)
            .take_while(|(a, _)| *a == from)
            .map(|(_, b)| *b)
            .collect()
    }

    /// Clients that may open connections to `to`, ordered by id.
    pub fn reachers_of(&self, to: ClientId) -> Vec<ClientId> {
        self.edges
            .iter()
            .filter(|(_, b)| *b == to)
            .map(|(a, _)| *a)
            .collect()
    }

    /// All edges in (source, target) order.
    pub fn edges(&self) -> impl Iterator<Item = (ClientId, ClientId)> + '_ {
        self.edges.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Compute every directed edge implied by `input`.
pub fn resolve(input: &ResolverInput) -> Reachability {
    let rules = input.rules_of();
    let nodes: Vec<Node<'_>> = input
        .clients
        .iter()
        .map(|c| Node {
            id: c.id,
            backend: c.backend(),
            policy: c
                .acl_policy
                .with_rules(rules.get(&c.id).copied().unwrap_or_default()),
        })
        .collect();

    let mut edges = BTreeSet::new();
    for a in &nodes {
        for b in &nodes {
            if a.id != b.id && may_reach(a, b, input.capabilities) {
                edges.insert((a.id, b.id));
            }
        }
    }
    Reachability { edges }
}

fn may_reach(a: &Node<'_>, b: &Node<'_>, caps: Capabilities) -> bool {
    if matches!(b.policy, AclPolicy::BlockAll) {
        return false;
    }
    if a.backend != b.backend && !caps.bridge_available {
        return false;
    }
    match (a.policy, b.policy) {
        (AclPolicy::AllowAll, _) | (_, AclPolicy::AllowAll) => true,
        (AclPolicy::Selected(outgoing), AclPolicy::Selected(incoming)) => {
            outgoing.iter().any(|r| r.target_id == b.id)
                || incoming
                    .iter()
                    .any(|r| r.bidirectional && r.target_id == a.id)
        }
        _ => false,
    }
}

/// Classify `owner`'s rule toward `rule.target_id` under `input`.
pub fn rule_state(input: &ResolverInput, owner: &VpnClient, rule: &AclRule) -> RuleState {
    let Some(target) = input.client(&rule.target_id) else {
        return RuleState::TargetMissing;
    };
    let bridged_off =
        owner.backend() != target.backend() && !input.capabilities.bridge_available;
    match (owner.acl_policy, target.acl_policy) {
        (_, PolicyMode::BlockAll) => RuleState::TargetBlocksAll,
        (PolicyMode::Selected, _) if bridged_off => RuleState::BridgeUnavailable,
        (PolicyMode::Selected, PolicyMode::AllowAll) => RuleState::TargetAllowsAll,
        (PolicyMode::Selected, PolicyMode::Selected) => RuleState::Active,
        _ => RuleState::OwnerNotSelected,
    }
}

/// Whether a rule from `owner` to `target` contributes an edge.
pub fn rule_is_actionable(input: &ResolverInput, owner: &VpnClient, rule: &AclRule) -> bool {
    rule_state(input, owner, rule).is_actionable()
}

/// Clients `owner` may pick as rule targets: everyone else, minus clients
/// on the other backend while the bridge is down.
pub fn selectable_targets(input: &ResolverInput, owner: &VpnClient) -> Vec<ClientId> {
    input
        .clients
        .iter()
        .filter(|c| c.id != owner.id)
        .filter(|c| input.capabilities.bridge_available || c.backend() == owner.backend())
        .map(|c| c.id)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{BackendRef, ObservedClient};

    struct Fixture {
        clients: Vec<VpnClient>,
        rules: Vec<RuleSet>,
        bridge: bool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clients: Vec::new(),
                rules: Vec::new(),
                bridge: true,
            }
        }

        fn add(&mut self, backend: Backend, mode: PolicyMode) -> ClientId {
            let n = u64::try_from(self.clients.len()).unwrap() + 1;
            let source = match backend {
                Backend::Headscale => BackendRef::Headscale { node_id: n },
                Backend::WireGuard => BackendRef::WireGuard {
                    public_key: format!("key{n}"),
                },
            };
            let mut c = VpnClient::discovered(
                ObservedClient {
                    source,
                    name: format!("c{n}"),
                    ip: format!("10.0.0.{n}").parse().unwrap(),
                    online: true,
                },
                Utc::now(),
            );
            c.acl_policy = mode;
            let id = c.id;
            self.clients.push(c);
            id
        }

        fn rule(&mut self, owner: ClientId, rule: AclRule) {
            if let Some(set) = self.rules.iter_mut().find(|s| s.owner == owner) {
                set.rules.push(rule);
            } else {
                self.rules.push(RuleSet {
                    owner,
                    rules: vec![rule],
                });
            }
        }

        fn input(&self) -> ResolverInput {
            ResolverInput {
                clients: Arc::new(self.clients.iter().cloned().map(Arc::new).collect()),
                rules: Arc::new(self.rules.iter().cloned().map(Arc::new).collect()),
                capabilities: Capabilities {
                    bridge_available: self.bridge,
                },
                revision: 0,
            }
        }

        fn resolve(&self) -> Reachability {
            resolve(&self.input())
        }
    }

    #[test]
    fn two_selected_clients_without_rules_are_isolated() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let b = f.add(Backend::WireGuard, PolicyMode::Selected);
        let r = f.resolve();
        assert!(!r.can_reach(a, b));
        assert!(!r.can_reach(b, a));
        assert!(r.is_empty());
    }

    #[test]
    fn one_way_rule_grants_one_direction() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let b = f.add(Backend::WireGuard, PolicyMode::Selected);
        f.rule(a, AclRule::to(b));
        let r = f.resolve();
        assert!(r.can_reach(a, b));
        assert!(!r.can_reach(b, a));
    }

    #[test]
    fn bidirectional_rule_grants_both_directions() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let b = f.add(Backend::WireGuard, PolicyMode::Selected);
        f.rule(a, AclRule::both_ways(b));
        let r = f.resolve();
        assert!(r.can_reach(a, b));
        assert!(r.can_reach(b, a));
    }

    #[test]
    fn block_all_target_wins_over_allow_all_source() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::AllowAll);
        let b = f.add(Backend::Headscale, PolicyMode::BlockAll);
        f.rule(b, AclRule::both_ways(a));
        let r = f.resolve();
        assert!(!r.can_reach(a, b));
    }

    #[test]
    fn block_all_source_reaches_allow_all_target_only() {
        let mut f = Fixture::new();
        let blocked = f.add(Backend::Headscale, PolicyMode::BlockAll);
        let open = f.add(Backend::WireGuard, PolicyMode::AllowAll);
        let sel = f.add(Backend::WireGuard, PolicyMode::Selected);
        f.rule(blocked, AclRule::to(sel));
        let r = f.resolve();
        assert!(r.can_reach(blocked, open));
        assert!(!r.can_reach(blocked, sel));
        assert!(!r.can_reach(open, blocked));
        assert!(!r.can_reach(sel, blocked));
    }

    #[test]
    fn allow_all_source_reaches_every_non_blocking_client() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::AllowAll);
        let b = f.add(Backend::WireGuard, PolicyMode::Selected);
        let c = f.add(Backend::Headscale, PolicyMode::Selected);
        let r = f.resolve();
        assert_eq!(r.reachable_from(a), {
            let mut v = vec![b, c];
            v.sort();
            v
        });
        // Reachability from A does not imply the reverse.
        assert!(!r.can_reach(b, a));
    }

    #[test]
    fn allow_all_target_is_reached_by_selected_without_rules() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let b = f.add(Backend::WireGuard, PolicyMode::AllowAll);
        let r = f.resolve();
        assert!(r.can_reach(a, b));
        assert_eq!(r.reachers_of(b), vec![a]);
    }

    #[test]
    fn rules_are_dormant_outside_selected() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let b = f.add(Backend::Headscale, PolicyMode::Selected);
        f.rule(a, AclRule::both_ways(b));
        assert!(f.resolve().can_reach(b, a));

        f.clients[0].acl_policy = PolicyMode::BlockAll;
        let r = f.resolve();
        assert!(!r.can_reach(a, b));
        assert!(!r.can_reach(b, a));

        f.clients[0].acl_policy = PolicyMode::Selected;
        assert!(f.resolve().can_reach(b, a));
    }

    #[test]
    fn bidirectional_rule_needs_selected_target() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let b = f.add(Backend::Headscale, PolicyMode::BlockAll);
        f.rule(a, AclRule::both_ways(b));
        let r = f.resolve();
        assert!(!r.can_reach(b, a));
        assert!(!r.can_reach(a, b));
    }

    #[test]
    fn bidirectional_flag_is_inert_for_non_selected_targets() {
        for owner_mode in [PolicyMode::Selected, PolicyMode::AllowAll] {
            for target_mode in [PolicyMode::AllowAll, PolicyMode::BlockAll] {
                let mut f = Fixture::new();
                let a = f.add(Backend::Headscale, owner_mode);
                let t = f.add(Backend::WireGuard, target_mode);
                f.add(Backend::Headscale, PolicyMode::Selected);
                f.rule(a, AclRule::to(t));
                let one_way = f.resolve();

                f.rules[0].rules[0].bidirectional = true;
                assert_eq!(f.rules[0].rules[0], AclRule::both_ways(t));
                assert_eq!(
                    one_way,
                    f.resolve(),
                    "owner {owner_mode:?}, target {target_mode:?}"
                );
            }
        }
    }

    #[test]
    fn bridge_down_cuts_cross_backend_pairs() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::AllowAll);
        let b = f.add(Backend::WireGuard, PolicyMode::AllowAll);
        let c = f.add(Backend::Headscale, PolicyMode::Selected);
        f.bridge = false;
        let r = f.resolve();
        assert!(!r.can_reach(a, b));
        assert!(!r.can_reach(b, a));
        assert!(r.can_reach(a, c));
    }

    #[test]
    fn no_self_edges_and_deterministic() {
        let mut f = Fixture::new();
        for _ in 0..4 {
            f.add(Backend::Headscale, PolicyMode::AllowAll);
        }
        let first = f.resolve();
        assert!(first.edges().all(|(a, b)| a != b));
        assert_eq!(first.len(), 12);
        assert_eq!(first, f.resolve());
    }

    #[test]
    fn dangling_rule_targets_are_ignored() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        f.rule(a, AclRule::to(ClientId::generate()));
        assert!(f.resolve().is_empty());
    }

    #[test]
    fn rule_states_explain_actionability() {
        let mut f = Fixture::new();
        let a = f.add(Backend::Headscale, PolicyMode::Selected);
        let blocked = f.add(Backend::Headscale, PolicyMode::BlockAll);
        let open = f.add(Backend::Headscale, PolicyMode::AllowAll);
        let peer = f.add(Backend::WireGuard, PolicyMode::Selected);
        let input = f.input();
        let owner = input.client(&a).unwrap().clone();

        assert_eq!(rule_state(&input, &owner, &AclRule::to(blocked)), RuleState::TargetBlocksAll);
        assert_eq!(rule_state(&input, &owner, &AclRule::to(open)), RuleState::TargetAllowsAll);
        assert_eq!(rule_state(&input, &owner, &AclRule::to(peer)), RuleState::Active);
        assert!(rule_is_actionable(&input, &owner, &AclRule::to(peer)));
        assert_eq!(
            rule_state(&input, &owner, &AclRule::to(ClientId::generate())),
            RuleState::TargetMissing
        );

        f.bridge = false;
        let input = f.input();
        assert_eq!(rule_state(&input, &owner, &AclRule::to(peer)), RuleState::BridgeUnavailable);
        assert_eq!(selectable_targets(&input, &owner).len(), 2);
    }
}
