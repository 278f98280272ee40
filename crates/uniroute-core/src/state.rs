//! `AppState`: the in-memory runtime state every request reads from
//! (spec §5 "runtime reads never hit the DB"), mirroring
//! `gproxy_core::state::AppState`'s `ArcSwap`-of-snapshot shape.

use std::sync::Arc;

use arc_swap::ArcSwap;
use uniroute_common::{GatewayConfig, SecretCipher};
use uniroute_provider_core::{ProviderKeyPool, SharedAccountingSink};
use uniroute_router::Router;
use uniroute_storage::{StorageSnapshot, UsageAggregate};

use crate::auth::AdminJwt;
use crate::ratelimit::CounterBackend;

pub struct AppState {
    pub global: ArcSwap<GatewayConfig>,
    pub snapshot: Arc<ArcSwap<StorageSnapshot>>,
    pub router: Arc<Router>,
    pub key_pool: Arc<ProviderKeyPool>,
    pub secret_cipher: SecretCipher,
    pub counters: Arc<dyn CounterBackend>,
    pub accounting: SharedAccountingSink,
    pub admin_jwt: Arc<AdminJwt>,
    pub storage: Arc<dyn uniroute_storage::Storage>,
}

impl AppState {
    pub fn apply_global_config(&self, config: GatewayConfig) {
        self.global.store(Arc::new(config));
    }

    pub fn apply_snapshot(&self, snapshot: StorageSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Re-resolves the `ProviderKeyPool`'s user-key map from the current
    /// snapshot, decrypting each BYOK ciphertext with the process cipher.
    /// Called after any provider-key admin mutation.
    pub fn refresh_provider_key_pool(&self) {
        let snapshot = self.snapshot.load();
        let mut user_keys = std::collections::HashMap::new();
        for row in &snapshot.provider_keys {
            if !row.is_active {
                continue;
            }
            let secret = uniroute_common::SecretBox {
                nonce: row.nonce.clone(),
                ciphertext: row.ciphertext.clone(),
            };
            if let Ok(plaintext) = self.secret_cipher.decrypt(&secret) {
                if let Ok(raw) = String::from_utf8(plaintext) {
                    user_keys.insert((row.user_id, row.provider.clone()), raw);
                }
            }
        }
        self.key_pool.replace_user_keys(user_keys);
    }

    pub fn rate_limit_params_for(&self, api_key_id: i64) -> (u32, u32) {
        let snapshot = self.snapshot.load();
        let global = self.global.load();
        snapshot
            .api_keys
            .iter()
            .find(|k| k.id == api_key_id)
            .map(|k| {
                (
                    k.rate_limit_per_minute.map(|v| v as u32).unwrap_or(global.rate_limit_per_minute),
                    k.rate_limit_per_day.map(|v| v as u32).unwrap_or(global.rate_limit_per_day),
                )
            })
            .unwrap_or((global.rate_limit_per_minute, global.rate_limit_per_day))
    }

    pub async fn usage_since(&self, since: time::OffsetDateTime) -> anyhow::Result<UsageAggregate> {
        let aggregate = self
            .storage
            .usage_aggregate(uniroute_storage::UsageFilter {
                from: since,
                to: time::OffsetDateTime::now_utc(),
                provider: None,
                model: None,
            })
            .await?;
        Ok(aggregate)
    }
}
