use async_trait::async_trait;
use uniroute_protocol::{ChatRequest, ChatResponse};

/// Adapter-level error classification (spec §4.3, §7). `Transient` and
/// `UpstreamError` are retriable and trigger failover to the next
/// candidate; `InvalidRequest` short-circuits failover and is propagated to
/// the caller immediately.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Connection-level failure (refused, reset, DNS) — retriable,
    /// eligible for the one same-provider retry the router allows before
    /// moving to the next candidate.
    Transient(String),
    /// Caller error (bad model, malformed request) — never retried.
    InvalidRequest(String),
    /// Upstream returned a 5xx/timeout after a successful connection —
    /// retriable via failover, but never retried on the same provider.
    UpstreamError(String),
}

impl ProviderError {
    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient(m)
            | ProviderError::InvalidRequest(m)
            | ProviderError::UpstreamError(m) => m,
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, ProviderError::InvalidRequest(_))
    }

    pub fn error_kind(&self) -> uniroute_common::ErrorKind {
        match self {
            ProviderError::Transient(_) | ProviderError::UpstreamError(_) => {
                uniroute_common::ErrorKind::UpstreamTransient
            }
            ProviderError::InvalidRequest(_) => uniroute_common::ErrorKind::UpstreamInvalid,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ProviderError {}

/// Per-call context threaded from GatewayFront into the provider adapter:
/// the resolved BYOK credential (if any), the outbound proxy, and a trace
/// id for correlating logs.
#[derive(Debug, Clone, Default)]
pub struct ProviderCallCtx {
    pub trace_id: String,
    pub api_key: Option<String>,
    pub proxy: Option<String>,
    pub timeout_secs: u64,
}

/// The common contract every backend adapter satisfies (spec §4.3).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider declares support for `model`, used directly
    /// by the model-based and cost-based strategies.
    fn accepts_model(&self, model: &str) -> bool;

    /// Model-name prefixes this provider's family matches, used by the
    /// model-based strategy's fallback rule (`gpt-*`, `claude-*`,
    /// `gemini-*`). Empty for adapters with no family fallback (e.g. local).
    fn model_family_prefixes(&self) -> &[&str] {
        &[]
    }

    /// Declared priced-per-million-tokens (input, output) in USD. Local
    /// providers return `(0.0, 0.0)`.
    fn default_price_per_million(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    /// Declared priority used to break cost ties (lower sorts first).
    fn priority(&self) -> i32 {
        0
    }

    async fn chat(
        &self,
        ctx: &ProviderCallCtx,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;

    /// A low-cost call (e.g. list-models) with a short timeout, used to
    /// refresh the health cache.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
