//! `/admin/provider-keys` (spec §6): BYOK provider credential CRUD plus a
//! live connectivity test. Grounded on `gproxy_router::admin`'s
//! credential handlers, generalized from the teacher's plaintext
//! `secret_json` column to `SecretCipher`-encrypted storage.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uniroute_protocol::chat::ChatRole;
use uniroute_protocol::{ChatMessage, ChatRequest};
use uniroute_provider_core::ProviderCallCtx;
use uniroute_storage::{NewProviderKey, Storage};

use crate::state::{AdminState, DEFAULT_USER_ID};

#[derive(Deserialize)]
pub struct UpsertProviderKeyRequest {
    provider: String,
    api_key: String,
}

#[derive(Serialize)]
struct UpsertProviderKeyResponse {
    id: i64,
}

pub async fn upsert_provider_key(
    State(state): State<AdminState>,
    Json(body): Json<UpsertProviderKeyRequest>,
) -> Response {
    let secret = state.app.secret_cipher.encrypt(body.api_key.as_bytes());
    let result = state
        .app
        .storage
        .upsert_provider_key(NewProviderKey {
            user_id: DEFAULT_USER_ID,
            provider: body.provider,
            nonce: secret.nonce,
            ciphertext: secret.ciphertext,
        })
        .await;

    let id = match result {
        Ok(id) => id,
        Err(err) => return storage_error(err),
    };

    if let Err(err) = refresh(&state).await {
        return storage_error(err);
    }
    (StatusCode::OK, Json(UpsertProviderKeyResponse { id })).into_response()
}

#[derive(Serialize)]
struct ProviderKeySummary {
    id: i64,
    user_id: i64,
    provider: String,
    is_active: bool,
}

pub async fn list_provider_keys(State(state): State<AdminState>) -> Json<Vec<ProviderKeySummary>> {
    let snapshot = state.app.snapshot.load();
    Json(
        snapshot
            .provider_keys
            .iter()
            .map(|k| ProviderKeySummary {
                id: k.id,
                user_id: k.user_id,
                provider: k.provider.clone(),
                is_active: k.is_active,
            })
            .collect(),
    )
}

pub async fn delete_provider_key(State(state): State<AdminState>, Path(provider): Path<String>) -> Response {
    if let Err(err) = state.app.storage.delete_provider_key(DEFAULT_USER_ID, &provider).await {
        return storage_error(err);
    }
    match refresh(&state).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => storage_error(err),
    }
}

#[derive(Deserialize)]
pub struct TestProviderKeyRequest {
    /// Overrides the stored key for this one probe, without persisting it.
    api_key: Option<String>,
    #[serde(default = "default_test_model")]
    model: String,
}

fn default_test_model() -> String {
    "test".to_string()
}

#[derive(Serialize)]
struct TestProviderKeyResponse {
    ok: bool,
    message: Option<String>,
}

/// Issues one real `chat()` call through the named provider's adapter
/// (`ChatProvider::health_check` takes no per-call credential, so it can't
/// exercise a specific candidate key) and reports whether it succeeded.
pub async fn test_provider_key(
    State(state): State<AdminState>,
    Path(provider): Path<String>,
    Json(body): Json<TestProviderKeyRequest>,
) -> Response {
    let Some(adapter) = state.app.router.providers().iter().find(|p| p.name() == provider).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "not_found", "message": "unknown provider" })),
        )
            .into_response();
    };

    let api_key = body.api_key.or_else(|| state.app.key_pool.resolve(Some(DEFAULT_USER_ID), &provider));

    let ctx = ProviderCallCtx {
        trace_id: uuid::Uuid::new_v4().to_string(),
        api_key,
        proxy: state.app.global.load().proxy.clone(),
        timeout_secs: state.app.global.load().provider_call_timeout_secs,
    };
    let request = ChatRequest {
        model: body.model,
        messages: vec![ChatMessage { role: ChatRole::User, content: "ping".to_string() }],
        temperature: None,
        max_tokens: Some(1),
    };

    match adapter.chat(&ctx, &request).await {
        Ok(_) => Json(TestProviderKeyResponse { ok: true, message: None }).into_response(),
        Err(err) => Json(TestProviderKeyResponse { ok: false, message: Some(err.message().to_string()) }).into_response(),
    }
}

async fn refresh(state: &AdminState) -> Result<(), uniroute_storage::StorageError> {
    let snapshot = state.app.storage.load_snapshot().await?;
    state.app.apply_snapshot(snapshot);
    state.app.refresh_provider_key_pool();
    Ok(())
}

fn storage_error(err: uniroute_storage::StorageError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal", "message": err.to_string() })),
    )
        .into_response()
}
