//! Gateway HTTP routes (spec §4.1, §6): `/v1/chat` and the read-only
//! routing/analytics surface. Auth and rate-limit middleware is applied by
//! the caller (`uniroute-core::gateway`) around this `axum::Router`;
//! handlers here assume a `Principal` extension is already present.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uniroute_common::{ErrorKind, Principal};
use uniroute_protocol::ChatRequest;
use uniroute_provider_core::{ProviderCallCtx, ProviderKeyPool, SharedAccountingSink, UsageEvent};
use uniroute_storage::{RequestLogFilter, Storage, UsageFilter};

use crate::cost::Price;
use crate::engine::{RouteError, Router};
use crate::routing::{CostBasedStrategy, LatencyBasedStrategy, LoadBalancedStrategy, ModelBasedStrategy};

pub struct RouterHttpState {
    pub router: Arc<Router>,
    pub key_pool: Arc<ProviderKeyPool>,
    pub accounting: SharedAccountingSink,
    pub storage: Arc<dyn Storage>,
    pub provider_call_timeout_secs: u64,
    pub outbound_proxy: Option<String>,
}

pub fn gateway_router(state: Arc<RouterHttpState>) -> AxumRouter {
    AxumRouter::new()
        .route("/v1/chat", post(chat))
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/{name}/health", get(provider_health))
        .route("/v1/routing/estimate-cost", post(estimate_cost))
        .route("/v1/routing/latency", get(routing_latency))
        .route("/v1/analytics/usage", get(analytics_usage))
        .route("/v1/analytics/requests", get(analytics_requests))
        .with_state(state)
}

pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InvalidRequest | ErrorKind::UpstreamInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NoProviderAvailable | ErrorKind::NoPortAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::TunnelNotConnected => StatusCode::BAD_GATEWAY,
            ErrorKind::TunnelTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamTransient => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "error": self.kind.as_str(), "message": self.message })),
        )
            .into_response()
    }
}

async fn chat(
    State(state): State<Arc<RouterHttpState>>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::new(ErrorKind::InvalidRequest, "messages must not be empty"));
    }

    let trace_id = principal.trace_id.clone();
    let user_id = principal.user_id;
    let key_pool = state.key_pool.clone();
    let proxy = state.outbound_proxy.clone();
    let timeout_secs = state.provider_call_timeout_secs;

    let outcome = state
        .router
        .route(&request, |provider_name| ProviderCallCtx {
            trace_id: trace_id.clone(),
            api_key: key_pool.resolve(Some(user_id), provider_name),
            proxy: proxy.clone(),
            timeout_secs,
        })
        .await;

    match outcome {
        Ok(route_outcome) => {
            state.accounting.record(UsageEvent {
                trace_id: trace_id.clone(),
                user_id: Some(user_id),
                key_id: principal.api_key_id,
                provider: route_outcome.provider.clone(),
                model: route_outcome.response.model.clone(),
                prompt_tokens: route_outcome.response.usage.prompt_tokens,
                completion_tokens: route_outcome.response.usage.completion_tokens,
                cost_usd: route_outcome.response.cost_usd,
                latency_ms: route_outcome.response.latency_ms,
                status: "ok",
            });
            Ok(Json(route_outcome.response).into_response())
        }
        Err(RouteError::NoProviderAvailable) => {
            state.accounting.record(UsageEvent {
                trace_id,
                user_id: Some(user_id),
                key_id: principal.api_key_id,
                provider: String::new(),
                model: request.model.clone(),
                prompt_tokens: 0,
                completion_tokens: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                status: "no_provider_available",
            });
            Err(GatewayError::new(ErrorKind::NoProviderAvailable, "no provider accepts this model"))
        }
        Err(RouteError::Upstream { provider, error }) => {
            state.accounting.record(UsageEvent {
                trace_id,
                user_id: Some(user_id),
                key_id: principal.api_key_id,
                provider: provider.clone(),
                model: request.model.clone(),
                prompt_tokens: 0,
                completion_tokens: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                status: "upstream_error",
            });
            Err(GatewayError::new(error.error_kind(), format!("{provider}: {}", error.message())))
        }
    }
}

#[derive(Serialize)]
struct ProviderSummary {
    name: String,
    healthy: bool,
    models: Vec<String>,
}

async fn list_providers(State(state): State<Arc<RouterHttpState>>) -> Json<Vec<ProviderSummary>> {
    let summaries = state
        .router
        .providers()
        .iter()
        .map(|p| ProviderSummary {
            name: p.name().to_string(),
            healthy: state.router.health.is_healthy(p.name()),
            models: p.model_family_prefixes().iter().map(|s| s.to_string()).collect(),
        })
        .collect();
    Json(summaries)
}

#[derive(Serialize)]
struct ProviderHealthResponse {
    provider: String,
    healthy: bool,
}

async fn provider_health(
    State(state): State<Arc<RouterHttpState>>,
    Path(name): Path<String>,
) -> Result<Json<ProviderHealthResponse>, GatewayError> {
    let exists = state.router.providers().iter().any(|p| p.name() == name);
    if !exists {
        return Err(GatewayError::new(ErrorKind::NotFound, "unknown provider"));
    }
    Ok(Json(ProviderHealthResponse {
        healthy: state.router.health.is_healthy(&name),
        provider: name,
    }))
}

#[derive(Deserialize)]
struct EstimateCostRequest {
    provider: String,
    #[serde(flatten)]
    chat: ChatRequest,
}

#[derive(Serialize)]
struct EstimateCostResponse {
    provider: String,
    estimated_cost_usd: f64,
}

async fn estimate_cost(
    State(state): State<Arc<RouterHttpState>>,
    Json(body): Json<EstimateCostRequest>,
) -> Result<Json<EstimateCostResponse>, GatewayError> {
    let provider = state
        .router
        .providers()
        .iter()
        .find(|p| p.name() == body.provider)
        .ok_or_else(|| GatewayError::new(ErrorKind::NotFound, "unknown provider"))?;
    let default = Price {
        per_million_input: provider.default_price_per_million().0,
        per_million_output: provider.default_price_per_million().1,
    };
    let estimated_cost_usd = state.router.cost.estimate(&body.provider, &body.chat, default);
    Ok(Json(EstimateCostResponse {
        provider: body.provider,
        estimated_cost_usd,
    }))
}

#[derive(Serialize)]
struct LatencyResponse {
    provider: String,
    samples: usize,
    min_ms: u64,
    max_ms: u64,
    avg_ms: u64,
}

async fn routing_latency(State(state): State<Arc<RouterHttpState>>) -> Json<Vec<LatencyResponse>> {
    let stats = state.router.latency.all_stats();
    Json(
        stats
            .into_iter()
            .map(|(provider, s)| LatencyResponse {
                provider,
                samples: s.samples,
                min_ms: s.min_ms,
                max_ms: s.max_ms,
                avg_ms: s.avg_ms,
            })
            .collect(),
    )
}

/// `start_time`/`end_time` are RFC 3339 timestamps; both default to a
/// trailing 30-day window when omitted.
#[derive(Deserialize)]
struct UsageQuery {
    start_time: Option<String>,
    end_time: Option<String>,
    provider: Option<String>,
    model: Option<String>,
}

#[derive(Serialize)]
struct UsageResponse {
    matched_rows: i64,
    prompt_tokens: i64,
    completion_tokens: i64,
    cost_usd: f64,
}

async fn analytics_usage(
    State(state): State<Arc<RouterHttpState>>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, GatewayError> {
    let now = OffsetDateTime::now_utc();
    let to = parse_timestamp(query.end_time.as_deref(), now)?;
    let from = parse_timestamp(query.start_time.as_deref(), to - time::Duration::days(30))?;

    let aggregate = state
        .storage
        .usage_aggregate(UsageFilter {
            from,
            to,
            provider: query.provider,
            model: query.model,
        })
        .await
        .map_err(|err| GatewayError::new(ErrorKind::Internal, err.to_string()))?;
    Ok(Json(UsageResponse {
        matched_rows: aggregate.matched_rows,
        prompt_tokens: aggregate.prompt_tokens,
        completion_tokens: aggregate.completion_tokens,
        cost_usd: aggregate.cost_usd,
    }))
}

fn parse_timestamp(raw: Option<&str>, default: OffsetDateTime) -> Result<OffsetDateTime, GatewayError> {
    match raw {
        None => Ok(default),
        Some(s) => OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
            .map_err(|_| GatewayError::new(ErrorKind::InvalidRequest, "timestamp must be RFC 3339")),
    }
}

#[derive(Deserialize)]
struct RequestLogQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
    method: Option<String>,
    path: Option<String>,
}

#[derive(Serialize)]
struct RequestLogEntryResponse {
    id: i64,
    at: String,
    kind: String,
    trace_id: String,
    user_id: Option<i64>,
    tunnel_id: Option<i64>,
    provider: Option<String>,
    model: Option<String>,
    method: Option<String>,
    path: Option<String>,
    status: Option<i32>,
    latency_ms: Option<i64>,
    error_kind: Option<String>,
}

const DEFAULT_REQUEST_LOG_PAGE: i64 = 50;
const MAX_REQUEST_LOG_PAGE: i64 = 500;

async fn analytics_requests(
    State(state): State<Arc<RouterHttpState>>,
    Query(query): Query<RequestLogQuery>,
) -> Result<Json<Vec<RequestLogEntryResponse>>, GatewayError> {
    let limit = query.limit.unwrap_or(DEFAULT_REQUEST_LOG_PAGE).clamp(1, MAX_REQUEST_LOG_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);

    let rows = state
        .storage
        .list_request_log(
            RequestLogFilter {
                tunnel_id: None,
                method: query.method,
                path: query.path,
            },
            limit,
            offset,
        )
        .await
        .map_err(|err| GatewayError::new(ErrorKind::Internal, err.to_string()))?;

    Ok(Json(
        rows.into_iter()
            .map(|r| RequestLogEntryResponse {
                id: r.id,
                at: r
                    .at
                    .format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_default(),
                kind: r.kind,
                trace_id: r.trace_id,
                user_id: r.user_id,
                tunnel_id: r.tunnel_id,
                provider: r.provider,
                model: r.model,
                method: r.method,
                path: r.path,
                status: r.status,
                latency_ms: r.latency_ms,
                error_kind: r.error_kind,
            })
            .collect(),
    ))
}

/// Builds a boxed `RoutingStrategy` from its admin-facing name (spec §4.2
/// "selected at runtime by admin call").
pub fn strategy_by_name(
    name: &str,
    cost: Arc<crate::cost::CostCalculator>,
    latency: Arc<crate::latency::LatencyTracker>,
) -> Option<Box<dyn crate::routing::RoutingStrategy>> {
    match name {
        "model" => Some(Box::new(ModelBasedStrategy)),
        "cost" => Some(Box::new(CostBasedStrategy { calculator: cost })),
        "latency" => Some(Box::new(LatencyBasedStrategy { tracker: latency })),
        "balanced" | "load_balanced" => Some(Box::new(LoadBalancedStrategy::new())),
        _ => None,
    }
}
