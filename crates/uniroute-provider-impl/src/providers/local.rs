//! Adapter for a local Ollama-compatible runtime (spec §4.3 "local
//! provider"). No credential is ever presented; `default_price_per_million`
//! stays `(0.0, 0.0)` since local inference has no per-token billing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uniroute_protocol::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage};
use uniroute_provider_core::{ChatProvider, ProviderCallCtx, ProviderError};

use crate::http_client::client_for_proxy;

pub struct LocalProvider {
    name: String,
    base_url: String,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "num_predict")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct WireResponse {
    message: WireMessageOwned,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessageOwned {
    content: String,
}

fn role_str(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl ChatProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_model(&self, _model: &str) -> bool {
        // The local runtime has no fixed catalog; it accepts whatever model
        // the operator has pulled. Callers select it explicitly via routing
        // strategy rather than relying on model-name matching.
        false
    }

    async fn chat(
        &self,
        ctx: &ProviderCallCtx,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let client = client_for_proxy(ctx.proxy.as_deref())?;
        let started = std::time::Instant::now();

        let wire = WireRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: role_str(&m.role),
                    content: &m.content,
                })
                .collect(),
            stream: false,
            options: Some(WireOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            }),
        };

        let mut builder = client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&wire);
        if ctx.timeout_secs > 0 {
            builder = builder.timeout(std::time::Duration::from_secs(ctx.timeout_secs));
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                ProviderError::Transient(err.to_string())
            } else {
                ProviderError::UpstreamError(err.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidRequest(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::UpstreamError(format!("{status}: {body}")));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::UpstreamError(err.to_string()))?;

        let latency_ms = started.elapsed().as_millis() as u64;
        let total_tokens = parsed.prompt_eval_count + parsed.eval_count;

        Ok(ChatResponse {
            id: uuid::Uuid::new_v4().to_string(),
            model: request.model.clone(),
            provider: self.name.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: parsed.message.content,
                },
                finish_reason: parsed.done_reason.unwrap_or_else(|| "stop".to_string()),
            }],
            usage: ChatUsage {
                prompt_tokens: parsed.prompt_eval_count,
                completion_tokens: parsed.eval_count,
                total_tokens,
            },
            cost_usd: 0.0,
            latency_ms,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let client = client_for_proxy(None)?;
        let response = client
            .get(format!("{}/api/tags", self.base_url.trim_end_matches('/')))
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|err| ProviderError::Transient(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::UpstreamError(response.status().to_string()))
        }
    }
}
