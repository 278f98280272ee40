use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait, Database,
    DatabaseBackend, DatabaseConnection, EntityTrait, FromQueryResult, QueryFilter, QueryOrder,
    QuerySelect, Schema,
};
use time::OffsetDateTime;
use uniroute_common::GatewayConfig;

use crate::entities;
use crate::snapshot::{
    ApiKeyRow, DomainRow, GlobalConfigRow, ProviderKeyRow, StorageSnapshot, TunnelRow,
    TunnelTokenRow, UserRow,
};
use crate::storage::{
    NewApiKey, NewDomain, NewProviderKey, NewRequestLogEntry, NewTunnel, NewTunnelToken,
    RequestLogFilter, RequestLogRow, Storage, StorageError, StorageResult, TunnelActivity,
    UsageAggregate, UsageFilter,
};

#[derive(Debug, FromQueryResult)]
struct UsageAggregateRow {
    matched_rows: Option<i64>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    cost_usd: Option<f64>,
}

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::Users)
            .register(entities::ApiKeys)
            .register(entities::ProviderKeys)
            .register(entities::Tunnels)
            .register(entities::Domains)
            .register(entities::TunnelTokens)
            .register(entities::RequestLog)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GatewayConfig>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        row.map(|m| serde_json::from_value(m.config_json).map_err(StorageError::from))
            .transpose()
    }

    async fn upsert_global_config(&self, config: &GatewayConfig) -> StorageResult<()> {
        use entities::global_config::ActiveModel as GlobalActive;

        let now = OffsetDateTime::now_utc();
        let id = 1_i64;
        let config_json = serde_json::to_value(config)?;

        let existing = entities::GlobalConfig::find_by_id(id).one(&self.db).await?;
        match existing {
            Some(model) => {
                let mut active: GlobalActive = model.into();
                active.config_json = ActiveValue::Set(config_json);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = GlobalActive {
                    id: ActiveValue::Set(id),
                    config_json: ActiveValue::Set(config_json),
                    updated_at: ActiveValue::Set(now),
                };
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let global_config = entities::GlobalConfig::find().one(&self.db).await?;
        let global_config = global_config
            .map(|m| -> StorageResult<GlobalConfigRow> {
                Ok(GlobalConfigRow {
                    id: m.id,
                    config: serde_json::from_value(m.config_json)?,
                    updated_at: m.updated_at,
                })
            })
            .transpose()?;

        let users = entities::Users::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| UserRow {
                id: m.id,
                name: m.name,
                enabled: m.enabled,
            })
            .collect();

        let api_keys = entities::ApiKeys::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ApiKeyRow {
                id: m.id,
                user_id: m.user_id,
                lookup_hash: m.lookup_hash,
                verification_hash: m.verification_hash,
                rate_limit_per_minute: m.rate_limit_per_minute,
                rate_limit_per_day: m.rate_limit_per_day,
                expires_at: m.expires_at,
                is_active: m.is_active,
            })
            .collect();

        let provider_keys = entities::ProviderKeys::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| ProviderKeyRow {
                id: m.id,
                user_id: m.user_id,
                provider: m.provider,
                nonce: m.nonce,
                ciphertext: m.ciphertext,
                is_active: m.is_active,
            })
            .collect();

        let tunnels = entities::Tunnels::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| TunnelRow {
                id: m.id,
                user_id: m.user_id,
                subdomain: m.subdomain,
                custom_domain: m.custom_domain,
                protocol: m.protocol,
                public_port: m.public_port,
                local_url: m.local_url,
                status: m.status,
            })
            .collect();

        let domains = entities::Domains::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| DomainRow {
                id: m.id,
                domain_name: m.domain_name,
                user_id: m.user_id,
                status: m.status,
                target_tunnel_id: m.target_tunnel_id,
            })
            .collect();

        let tunnel_tokens = entities::TunnelTokens::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| TunnelTokenRow {
                id: m.id,
                user_id: m.user_id,
                lookup_hash: m.lookup_hash,
                verification_hash: m.verification_hash,
                expires_at: m.expires_at,
                is_active: m.is_active,
            })
            .collect();

        Ok(StorageSnapshot {
            global_config,
            users,
            api_keys,
            provider_keys,
            tunnels,
            domains,
            tunnel_tokens,
        })
    }

    async fn ensure_user(&self, id: i64, name: &str, enabled: bool) -> StorageResult<i64> {
        use entities::users::ActiveModel;

        if let Some(model) = entities::Users::find_by_id(id).one(&self.db).await? {
            let mut active: ActiveModel = model.into();
            active.name = ActiveValue::Set(name.to_string());
            active.enabled = ActiveValue::Set(enabled);
            active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
            let updated = active.update(&self.db).await?;
            return Ok(updated.id);
        }

        let now = OffsetDateTime::now_utc();
        let active = ActiveModel {
            id: ActiveValue::Set(id),
            name: ActiveValue::Set(name.to_string()),
            enabled: ActiveValue::Set(enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = active.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn create_api_key(&self, input: NewApiKey) -> StorageResult<i64> {
        use entities::api_keys::ActiveModel;

        let now = OffsetDateTime::now_utc();
        let active = ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(input.user_id),
            lookup_hash: ActiveValue::Set(input.lookup_hash),
            verification_hash: ActiveValue::Set(input.verification_hash),
            name: ActiveValue::Set(input.name),
            rate_limit_per_minute: ActiveValue::Set(input.rate_limit_per_minute),
            rate_limit_per_day: ActiveValue::Set(input.rate_limit_per_day),
            expires_at: ActiveValue::Set(input.expires_at),
            is_active: ActiveValue::Set(true),
            created_at: ActiveValue::Set(now),
            last_used_at: ActiveValue::Set(None),
        };
        let inserted = active.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn revoke_api_key(&self, id: i64) -> StorageResult<()> {
        use entities::api_keys::ActiveModel;

        let model = entities::ApiKeys::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut active: ActiveModel = model.into();
        active.is_active = ActiveValue::Set(false);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn touch_api_key_last_used(&self, id: i64) -> StorageResult<()> {
        use entities::api_keys::ActiveModel;

        let model = entities::ApiKeys::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut active: ActiveModel = model.into();
        active.last_used_at = ActiveValue::Set(Some(OffsetDateTime::now_utc()));
        active.update(&self.db).await?;
        Ok(())
    }

    async fn upsert_provider_key(&self, input: NewProviderKey) -> StorageResult<i64> {
        use entities::provider_keys::{ActiveModel, Column};

        let now = OffsetDateTime::now_utc();
        let existing = entities::ProviderKeys::find()
            .filter(
                Condition::all()
                    .add(Column::UserId.eq(input.user_id))
                    .add(Column::Provider.eq(input.provider.clone())),
            )
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let id = model.id;
                let mut active: ActiveModel = model.into();
                active.nonce = ActiveValue::Set(input.nonce);
                active.ciphertext = ActiveValue::Set(input.ciphertext);
                active.is_active = ActiveValue::Set(true);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
                Ok(id)
            }
            None => {
                let active = ActiveModel {
                    id: ActiveValue::NotSet,
                    user_id: ActiveValue::Set(input.user_id),
                    provider: ActiveValue::Set(input.provider),
                    nonce: ActiveValue::Set(input.nonce),
                    ciphertext: ActiveValue::Set(input.ciphertext),
                    is_active: ActiveValue::Set(true),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                let inserted = active.insert(&self.db).await?;
                Ok(inserted.id)
            }
        }
    }

    async fn delete_provider_key(&self, user_id: i64, provider: &str) -> StorageResult<()> {
        use entities::provider_keys::Column;

        entities::ProviderKeys::delete_many()
            .filter(
                Condition::all()
                    .add(Column::UserId.eq(user_id))
                    .add(Column::Provider.eq(provider)),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn create_tunnel(&self, input: NewTunnel) -> StorageResult<i64> {
        use entities::tunnels::ActiveModel;

        let now = OffsetDateTime::now_utc();
        let active = ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(input.user_id),
            subdomain: ActiveValue::Set(input.subdomain),
            custom_domain: ActiveValue::Set(input.custom_domain),
            protocol: ActiveValue::Set(input.protocol),
            public_port: ActiveValue::Set(input.public_port),
            local_url: ActiveValue::Set(input.local_url),
            status: ActiveValue::Set("active".to_string()),
            request_count: ActiveValue::Set(0),
            bytes_total: ActiveValue::Set(0),
            error_count: ActiveValue::Set(0),
            avg_latency_ms: ActiveValue::Set(0),
            created_at: ActiveValue::Set(now),
            last_active_at: ActiveValue::Set(now),
        };
        let inserted = active.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn set_tunnel_status(&self, id: i64, status: &str) -> StorageResult<()> {
        use entities::tunnels::ActiveModel;

        let model = entities::Tunnels::find_by_id(id).one(&self.db).await?.ok_or(StorageError::NotFound)?;
        let mut active: ActiveModel = model.into();
        active.status = ActiveValue::Set(status.to_string());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn record_tunnel_activity(&self, id: i64, activity: TunnelActivity) -> StorageResult<()> {
        use entities::tunnels::ActiveModel;

        let model = entities::Tunnels::find_by_id(id).one(&self.db).await?.ok_or(StorageError::NotFound)?;
        let request_count = model.request_count + activity.requests;
        let bytes_total = model.bytes_total + activity.bytes;
        let error_count = model.error_count + activity.errors;
        let avg_latency_ms = match activity.latency_ms_sample {
            Some(sample) if request_count > 0 => {
                (model.avg_latency_ms * model.request_count + sample) / request_count
            }
            _ => model.avg_latency_ms,
        };
        let mut active: ActiveModel = model.into();
        active.request_count = ActiveValue::Set(request_count);
        active.bytes_total = ActiveValue::Set(bytes_total);
        active.error_count = ActiveValue::Set(error_count);
        active.avg_latency_ms = ActiveValue::Set(avg_latency_ms);
        active.last_active_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn create_domain(&self, input: NewDomain) -> StorageResult<i64> {
        use entities::domains::ActiveModel;

        let active = ActiveModel {
            id: ActiveValue::NotSet,
            domain_name: ActiveValue::Set(input.domain_name),
            user_id: ActiveValue::Set(input.user_id),
            status: ActiveValue::Set("pending_dns".to_string()),
            target_tunnel_id: ActiveValue::Set(None),
            challenge_nonce: ActiveValue::Set(input.challenge_nonce),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = active.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn set_domain_status(&self, id: i64, status: &str) -> StorageResult<()> {
        use entities::domains::ActiveModel;

        let model = entities::Domains::find_by_id(id).one(&self.db).await?.ok_or(StorageError::NotFound)?;
        let mut active: ActiveModel = model.into();
        active.status = ActiveValue::Set(status.to_string());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn create_tunnel_token(&self, input: NewTunnelToken) -> StorageResult<i64> {
        use entities::tunnel_tokens::ActiveModel;

        let active = ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(input.user_id),
            lookup_hash: ActiveValue::Set(input.lookup_hash),
            verification_hash: ActiveValue::Set(input.verification_hash),
            expires_at: ActiveValue::Set(input.expires_at),
            is_active: ActiveValue::Set(true),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let inserted = active.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn revoke_tunnel_token(&self, id: i64) -> StorageResult<()> {
        use entities::tunnel_tokens::ActiveModel;

        let model = entities::TunnelTokens::find_by_id(id).one(&self.db).await?.ok_or(StorageError::NotFound)?;
        let mut active: ActiveModel = model.into();
        active.is_active = ActiveValue::Set(false);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn append_request_log(&self, entry: NewRequestLogEntry) -> StorageResult<()> {
        use entities::request_log::ActiveModel;

        let active = ActiveModel {
            id: ActiveValue::NotSet,
            at: ActiveValue::Set(OffsetDateTime::now_utc()),
            kind: ActiveValue::Set(entry.kind.to_string()),
            trace_id: ActiveValue::Set(entry.trace_id),
            user_id: ActiveValue::Set(entry.user_id),
            api_key_id: ActiveValue::Set(entry.api_key_id),
            tunnel_id: ActiveValue::Set(entry.tunnel_id),
            provider: ActiveValue::Set(entry.provider),
            model: ActiveValue::Set(entry.model),
            method: ActiveValue::Set(entry.method),
            path: ActiveValue::Set(entry.path),
            status: ActiveValue::Set(entry.status),
            prompt_tokens: ActiveValue::Set(entry.prompt_tokens),
            completion_tokens: ActiveValue::Set(entry.completion_tokens),
            cost_usd: ActiveValue::Set(entry.cost_usd),
            latency_ms: ActiveValue::Set(entry.latency_ms),
            error_kind: ActiveValue::Set(entry.error_kind),
            request_headers: ActiveValue::Set(entry.request_headers),
            request_body: ActiveValue::Set(entry.request_body),
            response_headers: ActiveValue::Set(entry.response_headers),
            response_body: ActiveValue::Set(entry.response_body),
        };
        active.insert(&self.db).await?;
        Ok(())
    }

    async fn usage_aggregate(&self, filter: UsageFilter) -> StorageResult<UsageAggregate> {
        use entities::request_log::Column;

        let mut condition = Condition::all()
            .add(Column::At.gte(filter.from))
            .add(Column::At.lt(filter.to));
        if let Some(provider) = &filter.provider {
            condition = condition.add(Column::Provider.eq(provider.clone()));
        }
        if let Some(model) = &filter.model {
            condition = condition.add(Column::Model.eq(model.clone()));
        }

        let row = entities::RequestLog::find()
            .filter(condition)
            .select_only()
            .column_as(Column::Id.count(), "matched_rows")
            .column_as(Column::PromptTokens.sum(), "prompt_tokens")
            .column_as(Column::CompletionTokens.sum(), "completion_tokens")
            .column_as(Column::CostUsd.sum(), "cost_usd")
            .into_model::<UsageAggregateRow>()
            .one(&self.db)
            .await?;

        Ok(row
            .map(|r| UsageAggregate {
                matched_rows: r.matched_rows.unwrap_or(0),
                prompt_tokens: r.prompt_tokens.unwrap_or(0),
                completion_tokens: r.completion_tokens.unwrap_or(0),
                cost_usd: r.cost_usd.unwrap_or(0.0),
            })
            .unwrap_or_default())
    }

    async fn list_request_log(
        &self,
        filter: RequestLogFilter,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<RequestLogRow>> {
        use entities::request_log::Column;

        let mut condition = Condition::all();
        if let Some(tunnel_id) = filter.tunnel_id {
            condition = condition.add(Column::TunnelId.eq(tunnel_id));
        }
        if let Some(method) = &filter.method {
            condition = condition.add(Column::Method.eq(method.clone()));
        }
        if let Some(path) = &filter.path {
            condition = condition.add(Column::Path.eq(path.clone()));
        }

        let rows = entities::RequestLog::find()
            .filter(condition)
            .order_by_desc(Column::At)
            .limit(limit.max(0) as u64)
            .offset(offset.max(0) as u64)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|m| RequestLogRow {
                id: m.id,
                at: m.at,
                kind: m.kind,
                trace_id: m.trace_id,
                user_id: m.user_id,
                tunnel_id: m.tunnel_id,
                provider: m.provider,
                model: m.model,
                method: m.method,
                path: m.path,
                status: m.status,
                latency_ms: m.latency_ms,
                error_kind: m.error_kind,
                request_headers: m.request_headers,
                request_body: m.request_body,
                response_headers: m.response_headers,
                response_body: m.response_body,
            })
            .collect())
    }

    async fn get_request_log(&self, id: i64) -> StorageResult<Option<RequestLogRow>> {
        let row = entities::RequestLog::find_by_id(id).one(&self.db).await?;
        Ok(row.map(|m| RequestLogRow {
            id: m.id,
            at: m.at,
            kind: m.kind,
            trace_id: m.trace_id,
            user_id: m.user_id,
            tunnel_id: m.tunnel_id,
            provider: m.provider,
            model: m.model,
            method: m.method,
            path: m.path,
            status: m.status,
            latency_ms: m.latency_ms,
            error_kind: m.error_kind,
            request_headers: m.request_headers,
            request_body: m.request_body,
            response_headers: m.response_headers,
            response_body: m.response_body,
        }))
    }
}
