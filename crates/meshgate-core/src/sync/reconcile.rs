// ── Registry reconciliation ──
//
// Folds one complete set of observations into the registry. Clients are
// matched by backend identity first; an unmatched observation whose
// address belongs to a client that vanished from its own backend in the
// same pass is treated as that client moving, not as a new client. A
// client listed without a usable address counts as present.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{REMOVE_AFTER_MISSES, SourceListing, SyncReport};
use crate::model::{BackendRef, ClientId, ObservedClient};
use crate::store::{ClientRegistry, UpsertOutcome};

pub(super) fn reconcile(
    registry: &ClientRegistry,
    listing: SourceListing,
    now: DateTime<Utc>,
) -> SyncReport {
    let SourceListing {
        clients: observed,
        unaddressed,
    } = listing;
    let mut report = SyncReport {
        observed: observed.len(),
        ..SyncReport::default()
    };
    let reported: HashSet<BackendRef> = observed
        .iter()
        .map(|o| o.source.clone())
        .chain(unaddressed.iter().cloned())
        .collect();
    let mut seen: HashSet<ClientId> = HashSet::with_capacity(reported.len());

    for source in &unaddressed {
        let Some(existing) = registry.by_source(source) else {
            continue;
        };
        if registry.note_unaddressed(&existing.id) {
            debug!(client = %existing.id, %source, "client listed without an address");
            seen.insert(existing.id);
            report.unaddressed.push(existing.id);
        }
    }

    for obs in observed {
        if let Some(existing) = registry.by_source(&obs.source) {
            seen.insert(existing.id);
        } else if let Some(prev) = migration_candidate(registry, &obs, &reported, &seen) {
            match registry.rebind(prev, &obs, now) {
                Ok(moved) => {
                    info!(client = %moved.id, to = %moved.source, "client migrated");
                    seen.insert(moved.id);
                    report.migrated.push(moved.id);
                }
                Err(e) => {
                    warn!(source = %obs.source, error = %e, "migration skipped");
                    report.conflicts.push(format!("{}: {e}", obs.source));
                }
            }
            continue;
        }

        let source = obs.source.clone();
        match registry.upsert(obs, now) {
            Ok(UpsertOutcome::Inserted(id)) => {
                debug!(client = %id, %source, "client discovered");
                seen.insert(id);
                report.added.push(id);
            }
            Ok(UpsertOutcome::Updated { id, readdressed }) => {
                report.updated += 1;
                if readdressed {
                    report.readdressed.push(id);
                }
            }
            Err(e) => {
                warn!(%source, error = %e, "observation skipped");
                report.conflicts.push(format!("{source}: {e}"));
            }
        }
    }

    for client in registry.list().iter() {
        if seen.contains(&client.id) {
            continue;
        }
        match registry.note_absent(&client.id) {
            Some(misses) if misses >= REMOVE_AFTER_MISSES => {
                if registry.remove(&client.id).is_some() {
                    info!(client = %client.id, name = %client.name, "client removed");
                    report.removed.push(client.id);
                }
            }
            Some(_) => report.absent.push(client.id),
            None => {}
        }
    }

    report
}

/// The client holding `obs.ip` if its own backend identity went unreported
/// this pass.
fn migration_candidate(
    registry: &ClientRegistry,
    obs: &ObservedClient,
    reported: &HashSet<BackendRef>,
    seen: &HashSet<ClientId>,
) -> Option<ClientId> {
    registry
        .list_by_ip(obs.ip)
        .into_iter()
        .find(|c| !reported.contains(&c.source) && !seen.contains(&c.id))
        .map(|c| c.id)
}
