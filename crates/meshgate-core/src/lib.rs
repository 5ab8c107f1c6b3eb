//! Reachability policy engine for a panel that manages Headscale and
//! WireGuard clients side by side.
//!
//! - **[`Engine`]**: facade over the whole engine.
//!   [`start()`](Engine::start) restores persisted state, syncs, and spawns
//!   the periodic sync; [`Engine::oneshot()`] runs a single CLI operation.
//!
//! - **Stores** ([`store`]): [`ClientRegistry`] is the canonical client
//!   set (unique per backend identity and per address); [`PolicyStore`]
//!   validates and records every ACL write and marks enforcement pending.
//!
//! - **[`resolver`]**: pure function from clients, rules, and capabilities
//!   to directed reachability edges.
//!
//! - **[`sync`]** / **[`apply`]**: pull client lists from the backends
//!   and push rendered rule documents to the enforcement layers. Both
//!   coalesce concurrent callers onto one run.
//!
//! - **Domain model** ([`model`]): [`VpnClient`], [`PolicyMode`],
//!   [`AclRule`], status types, and flat views for presentation.

pub mod apply;
pub mod config;
pub mod dns;
pub mod engine;
pub mod error;
mod flight;
pub mod model;
pub mod persist;
pub mod resolver;
pub mod store;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use apply::{DocumentFormat, EnforcementApplier, EnforcementDocument};
pub use config::{
    DnsWebhookConfig, EngineConfig, HeadscaleConfig, TlsVerification, WireGuardConfig,
};
pub use dns::DnsRewriter;
pub use engine::{Collaborators, Engine};
pub use error::CoreError;
pub use resolver::{Reachability, ResolverInput};
pub use store::{ApplyTracker, ClientRegistry, PolicyStore};
pub use sync::{ClientSource, SourceListing, SyncReport};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AclPolicy, AclRule, ApplyStatus, Backend, BackendRef, Capabilities, ClientDetail, ClientId,
    ClientView, EngineStatus, ObservedClient, PolicyMode, ReachView, RuleSet, RuleState, RuleView,
    SyncState, SyncStatus, VpnClient,
};
