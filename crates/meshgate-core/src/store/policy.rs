// ── Policy store ──
//
// Owns every user-facing policy write: a client's ACL mode, its rule list,
// the bidirectional flag on a single rule, and the DNS toggle. All checks
// run before anything is written, so a rejected write leaves no trace.
// Policy writes mark the apply status pending; the DNS toggle does not,
// since it never changes reachability.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::collection::EntityCollection;
use super::registry::ClientRegistry;
use super::tracker::ApplyTracker;
use crate::error::CoreError;
use crate::model::{AclRule, Capabilities, ClientId, PolicyMode, RuleSet, VpnClient};
use crate::resolver::ResolverInput;

pub struct PolicyStore {
    registry: Arc<ClientRegistry>,
    tracker: Arc<ApplyTracker>,
    rules: EntityCollection<ClientId, RuleSet>,
    /// Held across validate-then-write so a concurrent removal cannot slip
    /// a dangling target in between.
    writer: Mutex<()>,
}

impl PolicyStore {
    pub fn new(registry: Arc<ClientRegistry>, tracker: Arc<ApplyTracker>) -> Self {
        Self {
            registry,
            tracker,
            rules: EntityCollection::new(),
            writer: Mutex::new(()),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Rules stored for `owner`, kept across mode switches.
    pub fn rules_for(&self, owner: &ClientId) -> Vec<AclRule> {
        self.rules
            .get(owner)
            .map(|set| set.rules.clone())
            .unwrap_or_default()
    }

    /// Every non-empty rule set, ordered by owner.
    pub fn rule_sets(&self) -> Arc<Vec<Arc<RuleSet>>> {
        self.rules.snapshot()
    }

    /// Capture a consistent input for the resolver.
    ///
    /// The revision is read first: if a write lands while the snapshots are
    /// taken, the captured revision is already stale and an apply of this
    /// input will not report `in_sync`.
    pub fn capture(&self, capabilities: Capabilities) -> ResolverInput {
        let revision = self.tracker.revision();
        ResolverInput {
            clients: self.registry.list(),
            rules: self.rules.snapshot(),
            capabilities,
            revision,
        }
    }

    // ── Policy writes ────────────────────────────────────────────────

    /// Change a client's ACL mode. Stored rules are kept.
    pub fn set_policy(&self, id: &ClientId, mode: PolicyMode) -> Result<Arc<VpnClient>, CoreError> {
        let current = self.registry.require(id)?;
        if current.acl_policy == mode {
            return Ok(current);
        }
        let updated = self.registry.set_mode(id, mode)?;
        self.tracker.mark_pending();
        debug!(client = %id, %mode, "acl policy changed");
        Ok(updated)
    }

    /// Replace a client's rule list.
    pub fn set_rules(&self, owner: &ClientId, rules: Vec<AclRule>) -> Result<(), CoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let set = self.validate(owner, rules)?;
        self.store(set);
        self.tracker.mark_pending();
        Ok(())
    }

    /// Change mode and rules together. Either both are written or neither.
    pub fn set_acl(
        &self,
        owner: &ClientId,
        mode: PolicyMode,
        rules: Vec<AclRule>,
    ) -> Result<(), CoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let set = self.validate(owner, rules)?;
        self.registry.set_mode(owner, mode)?;
        self.store(set);
        self.tracker.mark_pending();
        debug!(client = %owner, %mode, "acl replaced");
        Ok(())
    }

    /// Flip the bidirectional flag on `owner`'s rule for `target`.
    ///
    /// Returns the new flag value, or `None` when no such rule exists; a
    /// missing rule is a no-op so retries stay harmless.
    pub fn toggle_bidirectional(
        &self,
        owner: &ClientId,
        target: &ClientId,
    ) -> Result<Option<bool>, CoreError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.registry.require(owner)?;

        let Some(current) = self.rules.get(owner) else {
            return Ok(None);
        };
        if !current.targets(*target) {
            return Ok(None);
        }

        let mut flipped = None;
        self.rules.update(owner, |set| {
            let mut next = set.clone();
            for rule in &mut next.rules {
                if rule.target_id == *target {
                    rule.bidirectional = !rule.bidirectional;
                    flipped = Some(rule.bidirectional);
                }
            }
            next
        });
        if flipped.is_some() {
            self.tracker.mark_pending();
        }
        Ok(flipped)
    }

    /// Set the DNS rewrite flag. Reachability is unaffected.
    pub fn set_dns(&self, id: &ClientId, enabled: bool) -> Result<Arc<VpnClient>, CoreError> {
        self.registry.set_dns(id, enabled)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Drop everything that refers to a removed client: its own rule set
    /// and every rule naming it as a target. Returns whether anything was
    /// pruned.
    pub fn forget(&self, id: &ClientId) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pruned = self.rules.remove(id).is_some();

        let referencing: Vec<ClientId> = self
            .rules
            .snapshot()
            .iter()
            .filter(|set| set.targets(*id))
            .map(|set| set.owner)
            .collect();
        for owner in referencing {
            self.rules.update(&owner, |set| RuleSet {
                owner: set.owner,
                rules: set.rules.iter().filter(|r| r.target_id != *id).copied().collect(),
            });
            pruned = true;
        }
        pruned
    }

    /// Replace all rule sets with previously persisted ones. Rules whose
    /// owner or target is unknown to the registry are dropped.
    pub(crate) fn restore(&self, sets: Vec<RuleSet>) {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = sets
            .into_iter()
            .filter(|set| self.registry.contains(&set.owner))
            .map(|set| {
                let rules = set
                    .rules
                    .into_iter()
                    .filter(|r| r.target_id != set.owner && self.registry.contains(&r.target_id))
                    .collect();
                (set.owner, RuleSet { owner: set.owner, rules })
            })
            .filter(|(_, set)| !set.rules.is_empty());
        self.rules.replace_all(entries);
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn validate(&self, owner: &ClientId, rules: Vec<AclRule>) -> Result<RuleSet, CoreError> {
        self.registry.require(owner)?;
        let set = RuleSet::normalized(*owner, rules)?;
        if let Some(missing) = set
            .rules
            .iter()
            .find(|r| !self.registry.contains(&r.target_id))
        {
            return Err(CoreError::UnknownTarget {
                target_id: missing.target_id.to_string(),
            });
        }
        Ok(set)
    }

    fn store(&self, set: RuleSet) {
        if set.rules.is_empty() {
            self.rules.remove(&set.owner);
        } else {
            self.rules.upsert(set.owner, set);
        }
    }
}
