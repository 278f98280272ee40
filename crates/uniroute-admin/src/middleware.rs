//! Admin JWT middleware (spec §4.7, §6 "Admin HTTP API (JWT)"). Mirrors
//! `gproxy_router::admin::admin_auth`'s shape, swapping the teacher's static
//! `x-admin-key` comparison for bearer-JWT validation against
//! `AppState::admin_jwt`.

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use uniroute_core::auth::extract_bearer_token;

use crate::state::AdminState;

pub async fn admin_auth(
    State(state): State<AdminState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
    state.app.admin_jwt.validate(&token).map_err(|_| StatusCode::UNAUTHORIZED)?;
    Ok(next.run(req).await)
}
