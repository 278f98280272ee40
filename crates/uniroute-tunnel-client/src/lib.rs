//! The tunnel client (spec §4.4 "TunnelClient"): maintains the persistent
//! control connection to a `uniroute-tunnel-server`, forwards inbound
//! `http_request` frames to a local upstream, and resumes its prior
//! identity across reconnects via a small on-disk state file.

mod client;
mod local;
mod state;

pub use client::{ClientConfig, TunnelClient};
pub use local::{LocalForwarder, LocalResponse, DEFAULT_LOCAL_TIMEOUT};
pub use state::{PersistedState, StateFile};
