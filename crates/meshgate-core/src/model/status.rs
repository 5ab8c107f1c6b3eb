// ── Process-wide status types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the enforcement layers match the stored policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyStatus {
    pub last_applied_at: Option<DateTime<Utc>>,
    /// Every enforcement layer accepted the most recent rule documents, and
    /// nothing has changed since they were rendered.
    pub in_sync: bool,
    /// Policy or membership changed after the last successful apply.
    pub pending_changes: bool,
    pub last_error: Option<String>,
    /// Revision of the policy state the last successful apply rendered.
    pub applied_revision: Option<u64>,
}

impl Default for ApplyStatus {
    /// Nothing has been pushed yet, so enforcement cannot be assumed to
    /// match.
    fn default() -> Self {
        Self {
            last_applied_at: None,
            in_sync: false,
            pending_changes: true,
            last_error: None,
            applied_revision: None,
        }
    }
}

/// Sync activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
}

/// Outcome of the most recent registry refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// The last attempt failed; the registry holds older data.
    pub stale: bool,
    pub last_error: Option<String>,
}

/// Environment facts the resolver depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// The cross-network router between the two backends is up.
    pub bridge_available: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            bridge_available: true,
        }
    }
}

/// Everything the status endpoint reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub clients: usize,
    pub backends: Vec<super::Backend>,
    pub capabilities: Capabilities,
    pub sync: SyncStatus,
    pub apply: ApplyStatus,
    /// An apply is in flight right now.
    pub applying: bool,
}
