//! Shared state for every admin handler: the gateway's `AppState` plus the
//! tunnel server, since both live in the one `apps/uniroute-server` process
//! (spec §6 "Admin HTTP API" + "Public tunnel endpoints" are one binary's
//! two admin-facing surfaces).

use std::sync::Arc;

use uniroute_core::AppState;
use uniroute_tunnel_server::TunnelServer;

/// Every admin-created resource (api keys, provider keys) is attached to
/// this fixed user id. Multi-tenant user management is out of scope (spec.md
/// Non-goals); mirrors `uniroute_core::bootstrap::DEFAULT_USER_ID`.
pub const DEFAULT_USER_ID: i64 = 0;

#[derive(Clone)]
pub struct AdminState {
    pub app: Arc<AppState>,
    pub tunnel: Arc<TunnelServer>,
}
