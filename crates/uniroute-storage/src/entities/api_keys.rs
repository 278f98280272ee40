use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// API keys are looked up by `lookup_hash` (SHA256 of the raw key, O(1)
/// index) and verified with `bcrypt::verify` against `verification_hash`
/// (spec §4.7). The raw key is never stored.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique_key = "lookup_hash")]
    pub lookup_hash: String,
    pub verification_hash: String,
    pub name: Option<String>,
    pub rate_limit_per_minute: Option<i32>,
    pub rate_limit_per_day: Option<i32>,
    pub expires_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
