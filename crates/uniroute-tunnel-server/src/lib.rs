//! The tunnel server (spec §4.4 "TunnelServer"): accepts persistent
//! control connections from tunnel clients, allocates subdomains/ports, and
//! forwards public traffic to whichever client owns the matching tunnel.

mod auth;
mod domain;
mod ports;
mod raw_forward;
mod registry;
mod server;

pub use auth::{TunnelAuthContext, TunnelTokenAuth};
pub use domain::{generate_challenge_nonce, DomainError, DomainManager, RESERVED_LABELS};
pub use ports::{NoPortAvailable, PortAllocator};
pub use registry::{ForwardError, TunnelCounters, TunnelEntry, TunnelRegistry, TunnelStatus};
pub use server::TunnelServer;
