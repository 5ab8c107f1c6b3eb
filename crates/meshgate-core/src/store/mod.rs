// ── State stores ──
//
// The registry holds clients, the policy store holds rules and gates every
// user-facing write, and the tracker records whether enforcement matches.

mod collection;
pub mod policy;
pub mod registry;
pub mod tracker;

pub use policy::PolicyStore;
pub use registry::{ClientRegistry, UpsertOutcome};
pub use tracker::ApplyTracker;
