//! Row shapes loaded wholesale at bootstrap into the in-memory `AppState`
//! snapshot. Runtime reads never hit the DB directly (spec §5 "suspension
//! points"); only bootstrap and admin writes do.

use time::OffsetDateTime;
use uniroute_common::GatewayConfig;

#[derive(Debug, Clone)]
pub struct GlobalConfigRow {
    pub id: i64,
    pub config: GatewayConfig,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub lookup_hash: String,
    pub verification_hash: String,
    pub rate_limit_per_minute: Option<i32>,
    pub rate_limit_per_day: Option<i32>,
    pub expires_at: Option<OffsetDateTime>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct TunnelRow {
    pub id: i64,
    pub user_id: i64,
    pub subdomain: String,
    pub custom_domain: Option<String>,
    pub protocol: String,
    pub public_port: Option<i32>,
    pub local_url: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct DomainRow {
    pub id: i64,
    pub domain_name: String,
    pub user_id: i64,
    pub status: String,
    pub target_tunnel_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TunnelTokenRow {
    pub id: i64,
    pub user_id: i64,
    pub lookup_hash: String,
    pub verification_hash: String,
    pub expires_at: Option<OffsetDateTime>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSnapshot {
    pub global_config: Option<GlobalConfigRow>,
    pub users: Vec<UserRow>,
    pub api_keys: Vec<ApiKeyRow>,
    pub provider_keys: Vec<ProviderKeyRow>,
    pub tunnels: Vec<TunnelRow>,
    pub domains: Vec<DomainRow>,
    pub tunnel_tokens: Vec<TunnelTokenRow>,
}
