//! Async HTTP clients for the external collaborators of the meshgate policy
//! engine.
//!
//! - **[`HeadscaleClient`]** talks to a Headscale coordination server: node
//!   listing for client discovery and ACL policy upload for enforcement.
//! - **[`WgAgentClient`]** talks to the agent running on the WireGuard host:
//!   peer listing and nftables ruleset submission.
//! - **[`DnsWebhookClient`]** notifies the DNS rewrite collaborator when a
//!   client's rewrite flag flips.
//!
//! All clients share [`TransportConfig`] for TLS, timeout, and bearer auth.

pub mod dns;
pub mod error;
pub mod headscale;
pub mod transport;
pub mod wireguard;

pub use dns::{DnsRewriteRequest, DnsWebhookClient};
pub use error::Error;
pub use headscale::{HeadscaleClient, HeadscaleNode, HeadscaleUser};
pub use transport::{TlsMode, TransportConfig};
pub use wireguard::{WgAgentClient, WgPeer};
