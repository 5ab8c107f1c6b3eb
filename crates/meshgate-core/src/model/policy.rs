// ── ACL policy types ──

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ids::ClientId;
use crate::error::CoreError;

/// Per-client ACL mode as stored and exchanged on the wire.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyMode {
    /// Nothing reaches or leaves this client.
    BlockAll,
    /// Only the client's explicit rules grant reachability.
    #[default]
    Selected,
    /// Reaches everything, and everything may reach it.
    AllowAll,
}

impl PolicyMode {
    /// Pair the mode with the owner's stored rules. Rules only carry meaning
    /// under `Selected`; they stay stored under the other modes.
    pub fn with_rules(self, rules: &[AclRule]) -> AclPolicy<'_> {
        match self {
            Self::BlockAll => AclPolicy::BlockAll,
            Self::Selected => AclPolicy::Selected(rules),
            Self::AllowAll => AclPolicy::AllowAll,
        }
    }
}

impl FromStr for PolicyMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "block_all" => Ok(Self::BlockAll),
            "selected" => Ok(Self::Selected),
            "allow_all" => Ok(Self::AllowAll),
            other => Err(CoreError::InvalidPolicy {
                value: other.to_owned(),
            }),
        }
    }
}

/// A client's effective policy, with the rule list attached only where it
/// is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPolicy<'a> {
    BlockAll,
    Selected(&'a [AclRule]),
    AllowAll,
}

impl AclPolicy<'_> {
    pub fn mode(&self) -> PolicyMode {
        match self {
            Self::BlockAll => PolicyMode::BlockAll,
            Self::Selected(_) => PolicyMode::Selected,
            Self::AllowAll => PolicyMode::AllowAll,
        }
    }
}

/// A directed grant from the owning client to `target_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRule {
    pub target_id: ClientId,
    #[serde(default)]
    pub bidirectional: bool,
}

impl AclRule {
    pub fn to(target_id: ClientId) -> Self {
        Self {
            target_id,
            bidirectional: false,
        }
    }

    pub fn both_ways(target_id: ClientId) -> Self {
        Self {
            target_id,
            bidirectional: true,
        }
    }
}

/// The rule list owned by one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub owner: ClientId,
    pub rules: Vec<AclRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting self-targets and collapsing duplicates.
    /// A duplicate target keeps its first position and becomes bidirectional
    /// if any occurrence is.
    pub fn normalized(owner: ClientId, rules: Vec<AclRule>) -> Result<Self, CoreError> {
        let mut seen = HashSet::with_capacity(rules.len());
        let mut out: Vec<AclRule> = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.target_id == owner {
                return Err(CoreError::ValidationFailed {
                    message: format!("client {owner} cannot target itself"),
                });
            }
            if seen.insert(rule.target_id) {
                out.push(rule);
            } else if rule.bidirectional {
                if let Some(existing) = out.iter_mut().find(|r| r.target_id == rule.target_id) {
                    existing.bidirectional = true;
                }
            }
        }
        Ok(Self { owner, rules: out })
    }

    pub fn targets(&self, id: ClientId) -> bool {
        self.rules.iter().any(|r| r.target_id == id)
    }
}
