//! Adapter for Anthropic's `/v1/messages` API (and Anthropic-compatible
//! backends). The system prompt is lifted out of the message array per
//! Anthropic's wire shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uniroute_protocol::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage};
use uniroute_provider_core::{ChatProvider, ProviderCallCtx, ProviderError};

use crate::http_client::client_for_proxy;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicLikeProvider {
    name: String,
    base_url: String,
    price_per_million: (f64, f64),
}

impl AnthropicLikeProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            price_per_million: (0.0, 0.0),
        }
    }

    pub fn with_price_per_million(mut self, input: f64, output: f64) -> Self {
        self.price_per_million = (input, output);
        self
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    id: String,
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl ChatProvider for AnthropicLikeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_model(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    fn model_family_prefixes(&self) -> &[&str] {
        &["claude-"]
    }

    fn default_price_per_million(&self) -> (f64, f64) {
        self.price_per_million
    }

    async fn chat(
        &self,
        ctx: &ProviderCallCtx,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        let client = client_for_proxy(ctx.proxy.as_deref())?;
        let started = std::time::Instant::now();

        let system = request
            .messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str());

        let wire = WireRequest {
            model: &request.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| WireMessage {
                    role: match m.role {
                        ChatRole::Assistant => "assistant",
                        _ => "user",
                    },
                    content: &m.content,
                })
                .collect(),
            system,
            temperature: request.temperature,
        };

        let mut builder = client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&wire);
        if let Some(key) = &ctx.api_key {
            builder = builder.header("x-api-key", key);
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
        let cost_usd = (parsed.usage.input_tokens as f64 / 1_000_000.0) * input_price
            + (parsed.usage.output_tokens as f64 / 1_000_000.0) * output_price;
        let total_tokens = parsed.usage.input_tokens + parsed.usage.output_tokens;

        let content = parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResponse {
            id: parsed.id,
            model: request.model.clone(),
            provider: self.name.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content,
                },
                finish_reason: parsed.stop_reason.unwrap_or_else(|| "stop".to_string()),
            }],
            usage: ChatUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                total_tokens,
            },
            cost_usd,
            latency_ms,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let client = client_for_proxy(None)?;
        let response = client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&serde_json::json!({
                "model": "claude-3-haiku-20240307",
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "ping"}],
            }))
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|err| ProviderError::Transient(err.to_string()))?;
        // Anthropic returns 401 for a missing/invalid key even when reachable;
        // treat anything that isn't a connection failure as "up".
        if response.status().as_u16() >= 500 {
            Err(ProviderError::UpstreamError(response.status().to_string()))
        } else {
            Ok(())
        }
    }
}
