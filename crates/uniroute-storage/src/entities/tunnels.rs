use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tunnels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique_key = "tunnel_subdomain")]
    pub subdomain: String,
    pub custom_domain: Option<String>,
    /// One of "http", "tcp", "tls", "udp" (spec §3 Protocol).
    pub protocol: String,
    pub public_port: Option<i32>,
    pub local_url: String,
    /// One of "active", "paused", "closed".
    pub status: String,
    pub request_count: i64,
    pub bytes_total: i64,
    pub error_count: i64,
    pub avg_latency_ms: i64,
    pub created_at: OffsetDateTime,
    pub last_active_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
