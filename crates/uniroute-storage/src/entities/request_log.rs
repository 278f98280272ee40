use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Persisted downstream request/response records, covering both gateway
/// chat calls and tunnel-forwarded public requests (spec §4.1 side effect,
/// §4.4 step 7/8, §4.9 inspection / analytics endpoints).
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub at: OffsetDateTime,
    /// One of "gateway", "tunnel".
    pub kind: String,
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
    /// Ordered-header JSON and base64 body, populated for tunnel-forwarded
    /// requests (spec §4.4 step 7, §6 inspection/replay endpoints). Absent
    /// for gateway chat log rows.
    pub request_headers: Option<String>,
    pub request_body: Option<String>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
