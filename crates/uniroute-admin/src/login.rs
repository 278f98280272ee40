//! Issues the admin JWT (spec §4.7 "JWT ... used for administrative
//! endpoints"). The spec names the token itself but not how an operator
//! first obtains one; the bootstrap-supplied `admin_jwt_secret` plaintext
//! doubles as the login credential, matching the teacher's single shared
//! `admin_key` except the output here is a short-lived signed token rather
//! than the secret itself.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};
use uniroute_core::auth::sha256_hex;

use crate::state::AdminState;

const ADMIN_TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

#[derive(Deserialize)]
pub struct LoginRequest {
    secret: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    expires_in_secs: i64,
}

pub async fn login(State(state): State<AdminState>, Json(body): Json<LoginRequest>) -> Response {
    let expected = state.app.global.load().admin_jwt_secret_hash.clone();
    if sha256_hex(&body.secret) != expected {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "unauthorized", "message": "invalid admin secret" })),
        )
            .into_response();
    }

    match state.app.admin_jwt.issue("admin", ADMIN_TOKEN_TTL_SECS) {
        Ok(token) => Json(LoginResponse { token, expires_in_secs: ADMIN_TOKEN_TTL_SECS }).into_response(),
        Err(err) => err.into_response(),
    }
}
