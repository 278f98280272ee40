//! The Router engine (spec §4.2 "Public contract"): strategy-driven
//! provider selection with health-aware failover and cost/latency
//! accounting.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use uniroute_protocol::{ChatRequest, ChatResponse};
use uniroute_provider_core::{ChatProvider, ProviderCallCtx, ProviderError};

use crate::cost::{CostCalculator, Price};
use crate::health::HealthCache;
use crate::latency::LatencyTracker;
use crate::routing::{ModelBasedStrategy, RoutingStrategy};

pub struct RouteOutcome {
    pub response: ChatResponse,
    pub provider: String,
}

#[derive(Debug, Clone)]
pub enum RouteError {
    NoProviderAvailable,
    Upstream { provider: String, error: ProviderError },
}

/// Holds the ordered provider list, the swappable strategy, and the shared
/// latency/cost/health trackers. Strategy swaps (admin `POST
/// /admin/routing/strategy`) are lock-free via `ArcSwap`.
pub struct Router {
    providers: Arc<[Arc<dyn ChatProvider>]>,
    strategy: ArcSwap<Box<dyn RoutingStrategy>>,
    pub latency: Arc<LatencyTracker>,
    pub cost: Arc<CostCalculator>,
    pub health: Arc<HealthCache>,
}

impl Router {
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self {
            providers: providers.into(),
            strategy: ArcSwap::from_pointee(Box::new(ModelBasedStrategy) as Box<dyn RoutingStrategy>),
            latency: Arc::new(LatencyTracker::new()),
            cost: Arc::new(CostCalculator::new()),
            health: Arc::new(HealthCache::new()),
        }
    }

    pub fn providers(&self) -> &[Arc<dyn ChatProvider>] {
        &self.providers
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.load().name()
    }

    pub fn set_strategy(&self, strategy: Box<dyn RoutingStrategy>) {
        self.strategy.store(Arc::new(strategy));
    }

    /// Attempts each strategy-ordered candidate until one succeeds or the
    /// list is exhausted. A provider whose last health probe was unhealthy
    /// is skipped without an attempt. `invalid_request` errors propagate
    /// immediately without failover (spec §4.2 "Failover").
    pub async fn route(
        &self,
        request: &ChatRequest,
        ctx_for: impl Fn(&str) -> ProviderCallCtx,
    ) -> Result<RouteOutcome, RouteError> {
        let candidates = self.strategy.load().candidates(request, &self.providers);
        if candidates.is_empty() {
            return Err(RouteError::NoProviderAvailable);
        }

        let mut last_error: Option<(String, ProviderError)> = None;
        for provider in candidates {
            if !self.health.is_healthy(provider.name()) {
                continue;
            }

            let ctx = ctx_for(provider.name());
            let started = Instant::now();
            match provider.chat(&ctx, request).await {
                Ok(mut response) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.latency.record(provider.name(), elapsed_ms);
                    self.health.record(provider.name(), true);
                    let default = Price {
                        per_million_input: provider.default_price_per_million().0,
                        per_million_output: provider.default_price_per_million().1,
                    };
                    response.cost_usd =
                        self.cost.actual(provider.name(), &response.model, &response.usage, default);
                    response.latency_ms = elapsed_ms;
                    return Ok(RouteOutcome {
                        response,
                        provider: provider.name().to_string(),
                    });
                }
                Err(err) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    self.latency.record(provider.name(), elapsed_ms);
                    if err.is_invalid_request() {
                        return Err(RouteError::Upstream {
                            provider: provider.name().to_string(),
                            error: err,
                        });
                    }
                    self.health.record(provider.name(), false);
                    last_error = Some((provider.name().to_string(), err));
                }
            }
        }

        match last_error {
            Some((provider, error)) => Err(RouteError::Upstream { provider, error }),
            None => Err(RouteError::NoProviderAvailable),
        }
    }

    /// Spawns a background task that re-probes every provider whose health
    /// entry has gone stale (spec §4.3 "refreshed on a 30-second interval").
    /// Runs for the lifetime of the process; the returned handle is for
    /// callers that want to abort it on shutdown.
    pub fn spawn_health_prober(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(crate::health::REFRESH_INTERVAL);
            loop {
                interval.tick().await;
                for provider in self.providers.iter() {
                    if !self.health.needs_refresh(provider.name()) {
                        continue;
                    }
                    let healthy = provider.health_check().await.is_ok();
                    self.health.record(provider.name(), healthy);
                }
            }
        })
    }
}
