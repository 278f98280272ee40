//! Auth (spec §4.7): API-key authentication for the gateway and JWT
//! issuance/validation for the admin API. Mirrors
//! `gproxy_core::auth::{AuthProvider, AuthContext, MemoryAuth}`'s shape,
//! generalized to a lookup-hash + bcrypt-verification scheme and an
//! `ArcSwap`-backed snapshot instead of the teacher's raw key map.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uniroute_storage::StorageSnapshot;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: i64,
    pub api_key_id: i64,
}

pub trait AuthProvider: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, CoreError>;
}

/// `ur_` + 32 random bytes, base62-encoded (spec §4.7, §3 ApiKey). Looked up
/// by SHA-256 hex digest (O(1) against the in-memory snapshot), then
/// verified against the stored bcrypt hash so a leaked snapshot alone
/// cannot be replayed as a credential.
pub const API_KEY_PREFIX: &str = "ur_";

pub fn sha256_hex(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct ApiKeyAuth {
    snapshot: Arc<ArcSwap<StorageSnapshot>>,
}

impl ApiKeyAuth {
    pub fn new(snapshot: Arc<ArcSwap<StorageSnapshot>>) -> Self {
        Self { snapshot }
    }
}

impl AuthProvider for ApiKeyAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, CoreError> {
        let raw_key = extract_bearer(headers)
            .ok_or_else(|| CoreError::unauthorized("missing api key"))?;

        let lookup_hash = sha256_hex(&raw_key);
        let snapshot = self.snapshot.load();
        let row = snapshot
            .api_keys
            .iter()
            .find(|k| k.lookup_hash == lookup_hash)
            .ok_or_else(|| CoreError::unauthorized("invalid api key"))?;

        if !row.is_active {
            return Err(CoreError::unauthorized("api key revoked"));
        }
        if let Some(expires_at) = row.expires_at {
            if expires_at <= OffsetDateTime::now_utc() {
                return Err(CoreError::unauthorized("api key expired"));
            }
        }
        if !bcrypt::verify(&raw_key, &row.verification_hash).unwrap_or(false) {
            return Err(CoreError::unauthorized("invalid api key"));
        }

        let user_active = snapshot
            .users
            .iter()
            .find(|u| u.id == row.user_id)
            .map(|u| u.enabled)
            .unwrap_or(false);
        if !user_active {
            return Err(CoreError::unauthorized("user disabled"));
        }

        Ok(AuthContext {
            user_id: row.user_id,
            api_key_id: row.id,
        })
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Issues and validates HS256 admin tokens (spec §4.7 "JWT"). The secret is
/// the plaintext `admin_jwt_secret`; only its hash is persisted
/// (`GatewayConfig::admin_jwt_secret_hash`), so the plaintext must be
/// supplied out of band (CLI/ENV) on every process start.
pub struct AdminJwt {
    secret: Vec<u8>,
}

impl AdminJwt {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn issue(&self, subject: &str, ttl_secs: i64) -> Result<String, CoreError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AdminClaims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| CoreError::new(uniroute_common::ErrorKind::Internal, err.to_string()))
    }

    pub fn validate(&self, token: &str) -> Result<AdminClaims, CoreError> {
        decode::<AdminClaims>(token, &DecodingKey::from_secret(&self.secret), &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| CoreError::unauthorized("invalid or expired admin token"))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    extract_bearer(headers)
}
