//! Adapter for OpenAI and any OpenAI-compatible `/v1/chat/completions`
//! backend (OpenAI itself, many hosted-inference providers that mirror its
//! wire shape).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uniroute_protocol::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage};
use uniroute_provider_core::{ChatProvider, ProviderCallCtx, ProviderError};

use crate::http_client::client_for_proxy;

pub struct OpenAiLikeProvider {
    name: String,
    base_url: String,
    model_prefixes: Vec<&'static str>,
    price_per_million: (f64, f64),
    priority: i32,
}

impl OpenAiLikeProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            model_prefixes: vec!["gpt-", "o1-", "o3-"],
            price_per_million: (0.0, 0.0),
            priority: 0,
        }
    }

    pub fn with_model_prefixes(mut self, prefixes: Vec<&'static str>) -> Self {
        self.model_prefixes = prefixes;
        self
    }

    pub fn with_price_per_million(mut self, input: f64, output: f64) -> Self {
        self.price_per_million = (input, output);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    id: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireChoice {
    index: u32,
    message: WireMessageOwned,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessageOwned {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn role_str(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[async_trait]
impl ChatProvider for OpenAiLikeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_model(&self, model: &str) -> bool {
        self.model_prefixes.iter().any(|p| model.starts_with(p))
    }

    fn model_family_prefixes(&self) -> &[&str] {
        &self.model_prefixes
    }

    fn default_price_per_million(&self) -> (f64, f64) {
        self.price_per_million
    }

    fn priority(&self) -> i32 {
        self.priority
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
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = client
            .post(format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&wire);
        if let Some(key) = &ctx.api_key {
            builder = builder.bearer_auth(key);
        }
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
        let (input_price, output_price) = self.price_per_million;
        let cost_usd = (parsed.usage.prompt_tokens as f64 / 1_000_000.0) * input_price
            + (parsed.usage.completion_tokens as f64 / 1_000_000.0) * output_price;

        Ok(ChatResponse {
            id: parsed.id,
            model: request.model.clone(),
            provider: self.name.clone(),
            choices: parsed
                .choices
                .into_iter()
                .map(|c| ChatChoice {
                    index: c.index,
                    message: ChatMessage {
                        role: ChatRole::Assistant,
                        content: c.message.content,
                    },
                    finish_reason: c.finish_reason.unwrap_or_else(|| "stop".to_string()),
                })
                .collect(),
            usage: ChatUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
            cost_usd,
            latency_ms,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let client = client_for_proxy(None)?;
        let response = client
            .get(format!("{}/v1/models", self.base_url.trim_end_matches('/')))
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
