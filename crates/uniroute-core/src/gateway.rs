//! Gateway middleware stack (spec §4.7, §4.8): API-key auth, per-key
//! rate-limit headers, and security response headers wrapped around
//! `uniroute_router::http::gateway_router`. Mirrors the
//! `ServiceBuilder::new().layer(...)` composition the teacher uses around
//! `gproxy_core::core::Core`'s axum router.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router as AxumRouter;
use uniroute_common::SecurityHeadersLayer;
use uuid::Uuid;

use crate::auth::{ApiKeyAuth, AuthProvider};
use crate::error::CoreError;
use crate::ratelimit;
use crate::state::AppState;
use uniroute_common::Principal;
use uniroute_router::http::RouterHttpState;

pub fn build_gateway_router(state: Arc<AppState>) -> AxumRouter {
    let router_state = Arc::new(RouterHttpState {
        router: state.router.clone(),
        key_pool: state.key_pool.clone(),
        accounting: state.accounting.clone(),
        storage: state.storage.clone(),
        provider_call_timeout_secs: state.global.load().provider_call_timeout_secs,
        outbound_proxy: state.global.load().proxy.clone(),
    });

    uniroute_router::http::gateway_router(router_state)
        .layer(middleware::from_fn_with_state(state, auth_and_rate_limit))
        .layer(SecurityHeadersLayer)
}

/// Authenticates the API key, enforces the per-minute/per-day rate limit,
/// injects a `Principal` extension for downstream handlers, and stamps
/// `X-RateLimit-*` headers on the response (spec §4.8 "response headers").
async fn auth_and_rate_limit(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth = ApiKeyAuth::new(state.snapshot.clone());
    let ctx = match auth.authenticate(request.headers()) {
        Ok(ctx) => ctx,
        Err(err) => return core_error_response(err),
    };

    let (limit_per_minute, limit_per_day) = state.rate_limit_params_for(ctx.api_key_id);
    let outcome = ratelimit::check(
        state.counters.as_ref(),
        &ctx.api_key_id.to_string(),
        limit_per_minute,
        limit_per_day,
    );
    if !outcome.allowed {
        return core_error_response(CoreError::rate_limited("rate limit exceeded"));
    }

    let trace_id = Uuid::new_v4().to_string();
    request
        .extensions_mut()
        .insert(Principal::new(ctx.user_id, Some(ctx.api_key_id), trace_id));

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_bytes(b"X-RateLimit-Limit-PerMinute").expect("valid header name"),
        HeaderValue::from(outcome.limit_per_minute),
    );
    headers.insert(
        HeaderName::from_bytes(b"X-RateLimit-Remaining-PerMinute").expect("valid header name"),
        HeaderValue::from(outcome.remaining_per_minute),
    );
    headers.insert(
        HeaderName::from_bytes(b"X-RateLimit-Limit-PerDay").expect("valid header name"),
        HeaderValue::from(outcome.limit_per_day),
    );
    headers.insert(
        HeaderName::from_bytes(b"X-RateLimit-Remaining-PerDay").expect("valid header name"),
        HeaderValue::from(outcome.remaining_per_day),
    );
    response
}

fn core_error_response(err: CoreError) -> Response {
    err.into_response()
}
