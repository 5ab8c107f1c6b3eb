// ── Apply status tracking ──
//
// Every policy or membership change bumps a revision. An apply captures the
// revision before it renders, and only a successful apply whose revision is
// still current may report `in_sync`.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::model::ApplyStatus;

pub struct ApplyTracker {
    revision: AtomicU64,
    status: watch::Sender<ApplyStatus>,
}

impl ApplyTracker {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ApplyStatus::default());
        Self {
            revision: AtomicU64::new(0),
            status,
        }
    }

    /// Current policy revision.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Record that enforcement no longer matches the stored policy.
    pub fn mark_pending(&self) -> u64 {
        let rev = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.send_modify(|s| {
            s.pending_changes = true;
            s.in_sync = false;
        });
        rev
    }

    /// Record a fully accepted apply of the state at `revision`.
    pub fn record_success(&self, revision: u64, at: DateTime<Utc>) -> ApplyStatus {
        self.status.send_modify(|s| {
            // Read inside the lock so a concurrent `mark_pending` either
            // lands before this check or overwrites it afterwards.
            let current = self.revision.load(Ordering::SeqCst) == revision;
            s.last_applied_at = Some(at);
            s.applied_revision = Some(revision);
            s.last_error = None;
            s.in_sync = current;
            s.pending_changes = !current;
        });
        self.snapshot()
    }

    /// Record a failed or cancelled apply. Pending changes remain pending.
    pub fn record_failure(&self, error: &str) -> ApplyStatus {
        self.status.send_modify(|s| {
            s.in_sync = false;
            s.pending_changes = true;
            s.last_error = Some(error.to_owned());
        });
        self.snapshot()
    }

    /// Restore the revision counter and status from persisted state.
    pub(crate) fn restore(&self, status: ApplyStatus) {
        let applied = status.applied_revision.unwrap_or(0);
        let revision = if status.pending_changes { applied + 1 } else { applied };
        self.revision.store(revision, Ordering::SeqCst);
        self.status.send_modify(|s| *s = status);
    }

    pub fn snapshot(&self) -> ApplyStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ApplyStatus> {
        self.status.subscribe()
    }
}

impl Default for ApplyTracker {
    fn default() -> Self {
        Self::new()
    }
}
