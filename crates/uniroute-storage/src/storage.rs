use async_trait::async_trait;
use time::OffsetDateTime;
use uniroute_common::GatewayConfig;

use crate::snapshot::StorageSnapshot;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: i64,
    pub lookup_hash: String,
    pub verification_hash: String,
    pub name: Option<String>,
    pub rate_limit_per_minute: Option<i32>,
    pub rate_limit_per_day: Option<i32>,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewProviderKey {
    pub user_id: i64,
    pub provider: String,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewRequestLogEntry {
    pub kind: &'static str,
    pub trace_id: String,
    pub user_id: Option<i64>,
    pub api_key_id: Option<i64>,
    pub tunnel_id: Option<i64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub status: Option<i32>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub latency_ms: Option<i64>,
    pub error_kind: Option<String>,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageAggregate {
    pub matched_rows: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct UsageFilter {
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestLogFilter {
    pub tunnel_id: Option<i64>,
    pub method: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RequestLogRow {
    pub id: i64,
    pub at: OffsetDateTime,
    pub kind: String,
    pub trace_id: String,
    pub user_id: Option<i64>,
    pub tunnel_id: Option<i64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub status: Option<i32>,
    pub latency_ms: Option<i64>,
    pub error_kind: Option<String>,
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTunnel {
    pub user_id: i64,
    pub subdomain: String,
    pub custom_domain: Option<String>,
    pub protocol: String,
    pub public_port: Option<i32>,
    pub local_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct TunnelActivity {
    pub requests: i64,
    pub bytes: i64,
    pub errors: i64,
    pub latency_ms_sample: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewDomain {
    pub domain_name: String,
    pub user_id: i64,
    pub challenge_nonce: String,
}

#[derive(Debug, Clone)]
pub struct NewTunnelToken {
    pub user_id: i64,
    pub lookup_hash: String,
    pub verification_hash: String,
    pub expires_at: Option<OffsetDateTime>,
}

/// Storage is used for bootstrap (`load_snapshot`), admin mutations, and
/// request-log persistence. Runtime reads on the hot path must NOT hit the
/// DB — they read from the `ArcSwap` snapshot in `uniroute-core::AppState`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GatewayConfig>>;
    async fn upsert_global_config(&self, config: &GatewayConfig) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    /// Inserts the user at `id` if absent, otherwise updates `name`/`enabled`
    /// in place. Bootstrap uses this to seed the default user with a fixed
    /// id (0) across restarts.
    async fn ensure_user(&self, id: i64, name: &str, enabled: bool) -> StorageResult<i64>;

    async fn create_api_key(&self, input: NewApiKey) -> StorageResult<i64>;
    async fn revoke_api_key(&self, id: i64) -> StorageResult<()>;
    async fn touch_api_key_last_used(&self, id: i64) -> StorageResult<()>;

    async fn upsert_provider_key(&self, input: NewProviderKey) -> StorageResult<i64>;
    async fn delete_provider_key(&self, user_id: i64, provider: &str) -> StorageResult<()>;

    async fn create_tunnel(&self, input: NewTunnel) -> StorageResult<i64>;
    async fn set_tunnel_status(&self, id: i64, status: &str) -> StorageResult<()>;
    async fn record_tunnel_activity(&self, id: i64, activity: TunnelActivity) -> StorageResult<()>;

    async fn create_domain(&self, input: NewDomain) -> StorageResult<i64>;
    async fn set_domain_status(&self, id: i64, status: &str) -> StorageResult<()>;

    async fn create_tunnel_token(&self, input: NewTunnelToken) -> StorageResult<i64>;
    async fn revoke_tunnel_token(&self, id: i64) -> StorageResult<()>;

    async fn append_request_log(&self, entry: NewRequestLogEntry) -> StorageResult<()>;
    async fn usage_aggregate(&self, filter: UsageFilter) -> StorageResult<UsageAggregate>;
    async fn list_request_log(
        &self,
        filter: RequestLogFilter,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<RequestLogRow>>;
    async fn get_request_log(&self, id: i64) -> StorageResult<Option<RequestLogRow>>;
}
