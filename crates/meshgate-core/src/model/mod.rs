// ── Domain model ──
//
// Canonical types shared by the registry, the policy store, the resolver
// and every presentation layer.

pub mod client;
pub mod ids;
pub mod policy;
pub mod status;
pub mod view;

pub use client::{ObservedClient, VpnClient};
pub use ids::{Backend, BackendRef, ClientId};
pub use policy::{AclPolicy, AclRule, PolicyMode, RuleSet};
pub use status::{ApplyStatus, Capabilities, EngineStatus, SyncState, SyncStatus};
pub use view::{ClientDetail, ClientView, ReachView, RuleState, RuleView};
