//! The operator-facing admin API (spec §6 "Admin HTTP API (JWT)" and
//! "Public tunnel endpoints"): API-key and provider-key management, routing
//! strategy control, and tunnel inspection/replay. Mirrors
//! `gproxy_router::admin::admin_router`'s shape — one `axum::Router` guarded
//! by a single auth middleware layer — generalized from the teacher's
//! static shared-secret scheme to bearer JWTs.

mod api_keys;
mod login;
mod middleware;
mod provider_keys;
mod routing;
mod state;
mod tunnels;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use uniroute_common::SecurityHeadersLayer;
use uniroute_core::AppState;
use uniroute_tunnel_server::TunnelServer;

pub use state::AdminState;

pub fn admin_router(app: Arc<AppState>, tunnel: Arc<TunnelServer>) -> AxumRouter {
    let state = AdminState { app, tunnel };

    let protected = AxumRouter::new()
        .route("/admin/api-keys", post(api_keys::create_api_key).get(api_keys::list_api_keys))
        .route("/admin/api-keys/{id}", axum::routing::delete(api_keys::revoke_api_key))
        .route(
            "/admin/provider-keys",
            post(provider_keys::upsert_provider_key).get(provider_keys::list_provider_keys),
        )
        .route(
            "/admin/provider-keys/{provider}",
            axum::routing::delete(provider_keys::delete_provider_key),
        )
        .route("/admin/provider-keys/{provider}/test", post(provider_keys::test_provider_key))
        .route("/admin/routing/strategy", get(routing::get_strategy).post(routing::set_strategy))
        .route("/api/tunnels", get(tunnels::list_tunnels))
        .route("/api/tunnels/{id}/stats", get(tunnels::tunnel_stats))
        .route("/api/tunnels/{id}/requests", get(tunnels::list_requests))
        .route("/api/tunnels/{id}/requests/{rid}", get(tunnels::get_request))
        .route("/api/tunnels/{id}/requests/{rid}/replay", post(tunnels::replay_request))
        .layer(from_fn_with_state(state.clone(), middleware::admin_auth))
        .with_state(state.clone());

    let public = AxumRouter::new().route("/admin/auth/login", post(login::login)).with_state(state);

    public.merge(protected).layer(SecurityHeadersLayer)
}
