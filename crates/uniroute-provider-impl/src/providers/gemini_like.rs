//! Adapter for Gemini's `generateContent` REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uniroute_protocol::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatUsage};
use uniroute_provider_core::{ChatProvider, ProviderCallCtx, ProviderError};

use crate::http_client::client_for_proxy;

pub struct GeminiLikeProvider {
    name: String,
    base_url: String,
    price_per_million: (f64, f64),
}

impl GeminiLikeProvider {
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
    contents: Vec<WireContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireSystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
}

#[derive(Serialize)]
struct WireSystemInstruction<'a> {
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: &'a str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
struct WirePart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireResponse {
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: WireUsageMetadata,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: WireCandidateContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    parts: Vec<WirePartOwned>,
}

#[derive(Deserialize)]
struct WirePartOwned {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

#[async_trait]
impl ChatProvider for GeminiLikeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_model(&self, model: &str) -> bool {
        model.starts_with("gemini-")
    }

    fn model_family_prefixes(&self) -> &[&str] {
        &["gemini-"]
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
            .map(|m| WireSystemInstruction {
                parts: vec![WirePart { text: &m.content }],
            });

        let wire = WireRequest {
            contents: request
                .messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| WireContent {
                    role: match m.role {
                        ChatRole::Assistant => "model",
                        _ => "user",
                    },
                    parts: vec![WirePart { text: &m.content }],
                })
                .collect(),
            system_instruction: system,
            generation_config: Some(WireGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            }),
        };

        let api_key = ctx.api_key.clone().unwrap_or_default();
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            request.model,
            api_key
        );

        let mut builder = client.post(url).json(&wire);
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
        let cost_usd = (parsed.usage_metadata.prompt_token_count as f64 / 1_000_000.0) * input_price
            + (parsed.usage_metadata.candidates_token_count as f64 / 1_000_000.0) * output_price;

        let choices = parsed
            .candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| ChatChoice {
                index: index as u32,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: candidate
                        .content
                        .parts
                        .into_iter()
                        .map(|p| p.text)
                        .collect::<Vec<_>>()
                        .join(""),
                },
                finish_reason: candidate.finish_reason.unwrap_or_else(|| "STOP".to_string()),
            })
            .collect();

        Ok(ChatResponse {
            id: uuid::Uuid::new_v4().to_string(),
            model: request.model.clone(),
            provider: self.name.clone(),
            choices,
            usage: ChatUsage {
                prompt_tokens: parsed.usage_metadata.prompt_token_count,
                completion_tokens: parsed.usage_metadata.candidates_token_count,
                total_tokens: parsed.usage_metadata.total_token_count,
            },
            cost_usd,
            latency_ms,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let client = client_for_proxy(None)?;
        let response = client
            .get(format!("{}/v1beta/models", self.base_url.trim_end_matches('/')))
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|err| ProviderError::Transient(err.to_string()))?;
        if response.status().as_u16() >= 500 {
            Err(ProviderError::UpstreamError(response.status().to_string()))
        } else {
            Ok(())
        }
    }
}
