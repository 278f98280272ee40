//! Process bootstrap (spec §4.7, §5 "bootstrap sequence"): connect storage,
//! merge CLI > ENV > DB config once, seed the default user/admin key and the
//! provider registry, and assemble the in-memory `AppState` every request
//! reads from. Mirrors `gproxy_core::bootstrap::{CliArgs, bootstrap}`.

use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;
use sha2::{Digest, Sha256};
use uniroute_common::{GatewayConfig, GatewayConfigPatch, SecretCipher};
use uniroute_provider_core::{ChannelAccountingSink, ProviderKeyPool, SharedAccountingSink, UsageEvent};
use uniroute_provider_impl::{AnthropicLikeProvider, GeminiLikeProvider, LocalProvider, OpenAiLikeProvider};
use uniroute_router::Router;
use uniroute_storage::{NewApiKey, NewRequestLogEntry, SeaOrmStorage, Storage};

use crate::auth::{sha256_hex, AdminJwt, API_KEY_PREFIX};
use crate::ratelimit::InMemoryCounterBackend;
use crate::state::AppState;

/// Fixed id for the single bootstrap-seeded user. Multi-tenant user
/// management is out of scope (spec.md Non-goals); every API key created
/// through the admin API is attached to this user until that changes.
const DEFAULT_USER_ID: i64 = 0;

#[derive(Debug, Clone, Parser)]
#[command(name = "uniroute", version, about = "Unified multi-provider LLM gateway")]
pub struct CliArgs {
    /// Database DSN (sqlite/postgres, anything SeaORM accepts).
    #[arg(long, env = "UNIROUTE_DSN")]
    pub dsn: Option<String>,

    #[arg(long, env = "UNIROUTE_HOST")]
    pub host: Option<String>,

    #[arg(long, env = "UNIROUTE_PORT")]
    pub port: Option<u16>,

    /// Admin JWT signing secret (plaintext). Only its hash is persisted;
    /// the plaintext must be supplied again on every restart.
    #[arg(long, env = "UNIROUTE_ADMIN_JWT_SECRET")]
    pub admin_jwt_secret: Option<String>,

    /// Outbound proxy used for every call to an upstream provider.
    #[arg(long, env = "UNIROUTE_PROXY")]
    pub proxy: Option<String>,

    #[arg(long, env = "UNIROUTE_DEFAULT_ROUTING_STRATEGY")]
    pub default_routing_strategy: Option<String>,

    #[arg(long, env = "UNIROUTE_PROVIDER_CALL_TIMEOUT_SECS")]
    pub provider_call_timeout_secs: Option<u64>,

    #[arg(long, env = "UNIROUTE_RATE_LIMIT_PER_MINUTE")]
    pub rate_limit_per_minute: Option<u32>,

    #[arg(long, env = "UNIROUTE_RATE_LIMIT_PER_DAY")]
    pub rate_limit_per_day: Option<u32>,

    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,
    #[arg(long, env = "UNIROUTE_OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY")]
    pub anthropic_api_key: Option<String>,
    #[arg(long, env = "UNIROUTE_ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,
    #[arg(long, env = "UNIROUTE_GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    /// Base URL of a locally-hosted OpenAI-compatible model server, e.g.
    /// `http://127.0.0.1:11434/v1`. When unset the `local` provider isn't
    /// registered.
    #[arg(long, env = "UNIROUTE_LOCAL_PROVIDER_URL")]
    pub local_provider_url: Option<String>,
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = args.dsn.clone().unwrap_or_else(|| "sqlite://uniroute.db?mode=rwc".to_string());

    let storage = Arc::new(SeaOrmStorage::connect(&dsn).await.context("connect storage")?);
    storage.sync().await.context("schema sync")?;

    let db_global = storage.load_global_config().await.context("load global config")?;
    let mut merged = db_global.map(GatewayConfigPatch::from).unwrap_or_default();

    let admin_jwt_secret_plain = args
        .admin_jwt_secret
        .clone()
        .unwrap_or_else(|| {
            let generated = generate_secret();
            eprintln!("generated admin jwt secret: {generated}");
            generated
        });
    let secret_key_hex_override = if merged.secret_key_hex.is_none() {
        let generated = SecretCipher::generate_hex_key();
        eprintln!("generated provider-key encryption secret (store this to decrypt existing keys on restart): {generated}");
        Some(generated)
    } else {
        None
    };

    let cli_patch = GatewayConfigPatch {
        host: args.host.clone(),
        port: args.port,
        admin_jwt_secret_hash: Some(hash_secret(&admin_jwt_secret_plain)),
        dsn: Some(dsn.clone()),
        proxy: args.proxy.clone(),
        secret_key_hex: secret_key_hex_override,
        default_routing_strategy: args.default_routing_strategy.clone(),
        provider_call_timeout_secs: args.provider_call_timeout_secs,
        rate_limit_per_minute: args.rate_limit_per_minute,
        rate_limit_per_day: args.rate_limit_per_day,
    };
    merged.overlay(cli_patch);
    let global: GatewayConfig = merged.into_config().context("finalize merged gateway config")?;
    storage.upsert_global_config(&global).await.context("upsert global config")?;

    storage
        .ensure_user(DEFAULT_USER_ID, "default", true)
        .await
        .context("seed default user")?;

    if storage
        .load_snapshot()
        .await
        .context("load snapshot for bootstrap key check")?
        .api_keys
        .is_empty()
    {
        let (raw_key, verification_hash) = generate_api_key();
        storage
            .create_api_key(NewApiKey {
                user_id: DEFAULT_USER_ID,
                lookup_hash: sha256_hex(&raw_key),
                verification_hash,
                name: Some("bootstrap".to_string()),
                rate_limit_per_minute: None,
                rate_limit_per_day: None,
                expires_at: None,
            })
            .await
            .context("seed bootstrap api key")?;
        eprintln!("generated bootstrap api key: {raw_key}");
    }

    let snapshot = storage.load_snapshot().await.context("load snapshot")?;

    let secret_cipher = SecretCipher::from_hex(&global.secret_key_hex).context("build secret cipher")?;

    let key_pool = Arc::new(ProviderKeyPool::new());
    if let Some(key) = &args.openai_api_key {
        key_pool.set_process_key("openai", key.clone());
    }
    if let Some(key) = &args.anthropic_api_key {
        key_pool.set_process_key("anthropic", key.clone());
    }
    if let Some(key) = &args.gemini_api_key {
        key_pool.set_process_key("gemini", key.clone());
    }

    let router = Arc::new(Router::new(build_providers(&args)));
    router.clone().spawn_health_prober();

    let (accounting, mut accounting_rx) = ChannelAccountingSink::new(1024);
    let accounting: SharedAccountingSink = Arc::new(accounting);
    let sink_storage = storage.clone();
    tokio::spawn(async move {
        while let Some(event) = accounting_rx.recv().await {
            let _ = sink_storage.append_request_log(usage_event_to_log_entry(event)).await;
        }
    });

    let state = Arc::new(AppState {
        global: ArcSwap::from_pointee(global),
        snapshot: Arc::new(ArcSwap::from_pointee(snapshot)),
        router,
        key_pool,
        secret_cipher,
        counters: Arc::new(InMemoryCounterBackend::new()),
        accounting,
        admin_jwt: Arc::new(AdminJwt::new(admin_jwt_secret_plain.into_bytes())),
        storage: storage.clone() as Arc<dyn Storage>,
    });
    state.refresh_provider_key_pool();

    Ok(Bootstrap { storage, state })
}

fn usage_event_to_log_entry(event: UsageEvent) -> NewRequestLogEntry {
    NewRequestLogEntry {
        kind: "chat",
        trace_id: event.trace_id,
        user_id: event.user_id,
        api_key_id: event.key_id,
        tunnel_id: None,
        provider: Some(event.provider),
        model: Some(event.model),
        method: None,
        path: None,
        status: None,
        prompt_tokens: Some(event.prompt_tokens as i64),
        completion_tokens: Some(event.completion_tokens as i64),
        cost_usd: Some(event.cost_usd),
        latency_ms: Some(event.latency_ms as i64),
        error_kind: if event.status == "success" { None } else { Some(event.status.to_string()) },
        request_headers: None,
        request_body: None,
        response_headers: None,
        response_body: None,
    }
}

fn build_providers(args: &CliArgs) -> Vec<Arc<dyn uniroute_provider_core::ChatProvider>> {
    let mut providers: Vec<Arc<dyn uniroute_provider_core::ChatProvider>> = Vec::new();

    let openai_base = args.openai_base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
    providers.push(Arc::new(
        OpenAiLikeProvider::new("openai", openai_base).with_price_per_million(2.5, 10.0),
    ));

    let anthropic_base = args
        .anthropic_base_url
        .clone()
        .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string());
    providers.push(Arc::new(
        AnthropicLikeProvider::new("anthropic", anthropic_base).with_price_per_million(3.0, 15.0),
    ));

    let gemini_base = args
        .gemini_base_url
        .clone()
        .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
    providers.push(Arc::new(
        GeminiLikeProvider::new("gemini", gemini_base).with_price_per_million(1.25, 5.0),
    ));

    if let Some(local_url) = &args.local_provider_url {
        providers.push(Arc::new(LocalProvider::new("local", local_url.clone())));
    }

    providers
}

fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn generate_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generates a fresh `ur_`-prefixed API key and its bcrypt verification hash.
fn generate_api_key() -> (String, String) {
    use rand::Rng;
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    let raw = format!("{API_KEY_PREFIX}{}", base62_encode(&bytes));
    let verification_hash = bcrypt::hash(&raw, bcrypt::DEFAULT_COST).expect("bcrypt hash of a bounded-length key cannot fail");
    (raw, verification_hash)
}

fn base62_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut value = num_bigint_free_encode(bytes);
    if value.is_empty() {
        return "0".to_string();
    }
    value.reverse();
    value.into_iter().map(|digit| ALPHABET[digit as usize] as char).collect()
}

/// Base-62 digit expansion without pulling in a bignum crate: repeated
/// divide-by-62 over the big-endian byte string.
fn num_bigint_free_encode(bytes: &[u8]) -> Vec<u8> {
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
    out
}
