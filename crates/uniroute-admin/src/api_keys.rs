//! `/admin/api-keys` (spec §6): create/list/revoke gateway API keys. Mirrors
//! `uniroute_core::bootstrap`'s own key-minting helpers, duplicated here
//! since those are bootstrap-private; grounded on
//! `gproxy_router::admin::{insert_user_key, list_user_keys, delete_user_key}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uniroute_core::auth::{sha256_hex, API_KEY_PREFIX};
use uniroute_storage::{NewApiKey, Storage};

use crate::state::{AdminState, DEFAULT_USER_ID};

#[derive(Deserialize)]
pub struct CreateApiKeyRequest {
    name: Option<String>,
    rate_limit_per_minute: Option<i32>,
    rate_limit_per_day: Option<i32>,
    /// RFC 3339 timestamp; omit for a non-expiring key.
    expires_at: Option<String>,
}

#[derive(Serialize)]
struct CreateApiKeyResponse {
    id: i64,
    api_key: String,
}

pub async fn create_api_key(
    State(state): State<AdminState>,
    Json(body): Json<CreateApiKeyRequest>,
) -> Response {
    let expires_at = match body.expires_at.as_deref().map(parse_rfc3339) {
        Some(Ok(ts)) => Some(ts),
        Some(Err(_)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "invalid_request", "message": "expires_at must be RFC 3339" })),
            )
                .into_response();
        }
        None => None,
    };

    let (raw_key, verification_hash) = generate_api_key();
    let result = state
        .app
        .storage
        .create_api_key(NewApiKey {
            user_id: DEFAULT_USER_ID,
            lookup_hash: sha256_hex(&raw_key),
            verification_hash,
            name: body.name,
            rate_limit_per_minute: body.rate_limit_per_minute,
            rate_limit_per_day: body.rate_limit_per_day,
            expires_at,
        })
        .await;

    let id = match result {
        Ok(id) => id,
        Err(err) => return storage_error(err),
    };

    if let Err(err) = refresh_snapshot(&state).await {
        return storage_error(err);
    }

    (StatusCode::CREATED, Json(CreateApiKeyResponse { id, api_key: raw_key })).into_response()
}

#[derive(Serialize)]
struct ApiKeySummary {
    id: i64,
    user_id: i64,
    is_active: bool,
    rate_limit_per_minute: Option<i32>,
    rate_limit_per_day: Option<i32>,
    expires_at: Option<String>,
}

pub async fn list_api_keys(State(state): State<AdminState>) -> Json<Vec<ApiKeySummary>> {
    let snapshot = state.app.snapshot.load();
    Json(
        snapshot
            .api_keys
            .iter()
            .map(|k| ApiKeySummary {
                id: k.id,
                user_id: k.user_id,
                is_active: k.is_active,
                rate_limit_per_minute: k.rate_limit_per_minute,
                rate_limit_per_day: k.rate_limit_per_day,
                expires_at: k.expires_at.and_then(|ts| ts.format(&time::format_description::well_known::Rfc3339).ok()),
            })
            .collect(),
    )
}

pub async fn revoke_api_key(State(state): State<AdminState>, Path(id): Path<i64>) -> Response {
    if let Err(err) = state.app.storage.revoke_api_key(id).await {
        return storage_error(err);
    }
    match refresh_snapshot(&state).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => storage_error(err),
    }
}

async fn refresh_snapshot(state: &AdminState) -> Result<(), uniroute_storage::StorageError> {
    let snapshot = state.app.storage.load_snapshot().await?;
    state.app.apply_snapshot(snapshot);
    Ok(())
}

fn parse_rfc3339(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
}

/// Generates a fresh `ur_`-prefixed API key and its bcrypt verification
/// hash. Grounded on `uniroute_core::bootstrap::generate_api_key`, which
/// can't be reused directly since it's a bootstrap-private helper.
fn generate_api_key() -> (String, String) {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    let raw = format!("{API_KEY_PREFIX}{}", base62_encode(&bytes));
    let verification_hash = bcrypt::hash(&raw, bcrypt::DEFAULT_COST).expect("bcrypt hash of a bounded-length key cannot fail");
    (raw, verification_hash)
}

fn base62_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut digits = bytes.to_vec();
    let mut out = Vec::new();
    while !digits.iter().all(|b| *b == 0) {
        let mut remainder = 0u32;
        for byte in digits.iter_mut() {
            let acc = (remainder << 8) | *byte as u32;
            *byte = (acc / 62) as u8;
            remainder = acc % 62;
        }
        out.push(remainder as u8);
    }
    if out.is_empty() {
        return "0".to_string();
    }
    out.reverse();
    out.into_iter().map(|digit| ALPHABET[digit as usize] as char).collect()
}

fn storage_error(err: uniroute_storage::StorageError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal", "message": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base62_encode_rejects_leading_zero_padding() {
        assert_eq!(base62_encode(&[0, 0, 0]), "0");
    }

    #[test]
    fn base62_encode_is_deterministic_and_alphanumeric() {
        let encoded = base62_encode(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!encoded.is_empty());
        assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(encoded, base62_encode(&[1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn generate_api_key_is_prefixed_and_hashable() {
        let (raw, hash) = generate_api_key();
        assert!(raw.starts_with(API_KEY_PREFIX));
        assert!(bcrypt::verify(&raw, &hash).unwrap());
    }

    #[test]
    fn parse_rfc3339_rejects_garbage() {
        assert!(parse_rfc3339("not-a-timestamp").is_err());
        assert!(parse_rfc3339("2026-01-01T00:00:00Z").is_ok());
    }
}
