use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Tunnel client auth tokens (spec §4.7 "Tunnel authentication"), looked up
/// by SHA256 and verified with bcrypt, mirroring `api_keys`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tunnel_tokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique_key = "tunnel_token_lookup_hash")]
    pub lookup_hash: String,
    pub verification_hash: String,
    pub expires_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
