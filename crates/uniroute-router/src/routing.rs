//! Routing strategies (spec §4.2 "Strategies"): each produces an ordered
//! candidate list the engine attempts in order until one succeeds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uniroute_protocol::ChatRequest;
use uniroute_provider_core::ChatProvider;

use crate::cost::{CostCalculator, Price};
use crate::latency::LatencyTracker;

pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns candidates for `request`, most-preferred first. An empty
    /// list means `no_provider_available`.
    fn candidates(
        &self,
        request: &ChatRequest,
        providers: &[Arc<dyn ChatProvider>],
    ) -> Vec<Arc<dyn ChatProvider>>;
}

/// Default: exact model match first, then family-prefix match, then the
/// first local (zero-family-prefix) provider.
pub struct ModelBasedStrategy;

impl RoutingStrategy for ModelBasedStrategy {
    fn name(&self) -> &'static str {
        "model"
    }

    fn candidates(
        &self,
        request: &ChatRequest,
        providers: &[Arc<dyn ChatProvider>],
    ) -> Vec<Arc<dyn ChatProvider>> {
        let mut ordered: Vec<Arc<dyn ChatProvider>> = providers
            .iter()
            .filter(|p| p.accepts_model(&request.model))
            .cloned()
            .collect();
        if !ordered.is_empty() {
            return ordered;
        }

        ordered = providers
            .iter()
            .filter(|p| {
                p.model_family_prefixes()
                    .iter()
                    .any(|prefix| request.model.starts_with(prefix))
            })
            .cloned()
            .collect();
        if !ordered.is_empty() {
            return ordered;
        }

        providers
            .iter()
            .filter(|p| p.model_family_prefixes().is_empty())
            .cloned()
            .collect()
    }
}

/// Among providers accepting the model, minimize estimated cost; ties
/// broken by declared priority (lower sorts first).
pub struct CostBasedStrategy {
    pub calculator: Arc<CostCalculator>,
}

impl RoutingStrategy for CostBasedStrategy {
    fn name(&self) -> &'static str {
        "cost"
    }

    fn candidates(
        &self,
        request: &ChatRequest,
        providers: &[Arc<dyn ChatProvider>],
    ) -> Vec<Arc<dyn ChatProvider>> {
        let mut accepting: Vec<Arc<dyn ChatProvider>> = providers
            .iter()
            .filter(|p| p.accepts_model(&request.model))
            .cloned()
            .collect();

        accepting.sort_by(|a, b| {
            let default_a = Price {
                per_million_input: a.default_price_per_million().0,
                per_million_output: a.default_price_per_million().1,
            };
            let default_b = Price {
                per_million_input: b.default_price_per_million().0,
                per_million_output: b.default_price_per_million().1,
            };
            let cost_a = self.calculator.estimate(a.name(), request, default_a);
            let cost_b = self.calculator.estimate(b.name(), request, default_b);
            cost_a
                .partial_cmp(&cost_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.priority().cmp(&b.priority()))
        });
        accepting
    }
}

/// Lowest rolling average latency first; providers with fewer than 3
/// samples are preferred once before ranking by average (untested
/// providers get a chance rather than being starved by stale statistics).
pub struct LatencyBasedStrategy {
    pub tracker: Arc<LatencyTracker>,
}

impl RoutingStrategy for LatencyBasedStrategy {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn candidates(
        &self,
        request: &ChatRequest,
        providers: &[Arc<dyn ChatProvider>],
    ) -> Vec<Arc<dyn ChatProvider>> {
        let mut accepting: Vec<Arc<dyn ChatProvider>> = providers
            .iter()
            .filter(|p| p.accepts_model(&request.model))
            .cloned()
            .collect();

        accepting.sort_by(|a, b| {
            let stats_a = self.tracker.stats(a.name());
            let stats_b = self.tracker.stats(b.name());
            match (stats_a.samples < 3, stats_b.samples < 3) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => stats_a.avg_ms.cmp(&stats_b.avg_ms),
            }
        });
        accepting
    }
}

/// Round-robin across providers accepting the model.
pub struct LoadBalancedStrategy {
    cursor: AtomicUsize,
}

impl LoadBalancedStrategy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for LoadBalancedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingStrategy for LoadBalancedStrategy {
    fn name(&self) -> &'static str {
        "load_balanced"
    }

    fn candidates(
        &self,
        request: &ChatRequest,
        providers: &[Arc<dyn ChatProvider>],
    ) -> Vec<Arc<dyn ChatProvider>> {
        let accepting: Vec<Arc<dyn ChatProvider>> = providers
            .iter()
            .filter(|p| p.accepts_model(&request.model))
            .cloned()
            .collect();
        if accepting.is_empty() {
            return accepting;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % accepting.len();
        accepting
            .iter()
            .cycle()
            .skip(start)
            .take(accepting.len())
            .cloned()
            .collect()
    }
}

/// User-supplied predicate returning an ordered candidate list.
pub struct CustomStrategy {
    pub predicate: Box<dyn Fn(&ChatRequest, &[Arc<dyn ChatProvider>]) -> Vec<Arc<dyn ChatProvider>> + Send + Sync>,
}

impl RoutingStrategy for CustomStrategy {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn candidates(
        &self,
        request: &ChatRequest,
        providers: &[Arc<dyn ChatProvider>],
    ) -> Vec<Arc<dyn ChatProvider>> {
        (self.predicate)(request, providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uniroute_protocol::{ChatMessage, ChatResponse, ChatRole};
    use uniroute_provider_core::{ProviderCallCtx, ProviderError};

    struct StubProvider {
        name: &'static str,
        prefixes: Vec<&'static str>,
    }

    #[async_trait]
    impl ChatProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn accepts_model(&self, _model: &str) -> bool {
            false
        }
        fn model_family_prefixes(&self) -> &[&str] {
            &self.prefixes
        }
        async fn chat(
            &self,
            _ctx: &ProviderCallCtx,
            _request: &ChatRequest,
        ) -> Result<ChatResponse, ProviderError> {
            unimplemented!()
        }
        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn req(model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "hi".to_string(),
            }],
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn model_based_falls_back_to_family_prefix_then_local() {
        let openai: Arc<dyn ChatProvider> = Arc::new(StubProvider {
            name: "openai",
            prefixes: vec!["gpt-"],
        });
        let local: Arc<dyn ChatProvider> = Arc::new(StubProvider {
            name: "local",
            prefixes: vec![],
        });
        let providers = vec![openai.clone(), local.clone()];
        let strategy = ModelBasedStrategy;

        let candidates = strategy.candidates(&req("gpt-4"), &providers);
        assert_eq!(candidates[0].name(), "openai");

        let candidates = strategy.candidates(&req("unknown-model"), &providers);
        assert_eq!(candidates[0].name(), "local");
    }

    #[test]
    fn load_balanced_round_robins_across_calls() {
        // accepts_model stubbed false above, so build providers that accept.
        struct Accepting(&'static str);
        #[async_trait]
        impl ChatProvider for Accepting {
            fn name(&self) -> &str {
                self.0
            }
            fn accepts_model(&self, _model: &str) -> bool {
                true
            }
            async fn chat(
                &self,
                _ctx: &ProviderCallCtx,
                _request: &ChatRequest,
            ) -> Result<ChatResponse, ProviderError> {
                unimplemented!()
            }
            async fn health_check(&self) -> Result<(), ProviderError> {
                Ok(())
            }
        }
        let providers: Vec<Arc<dyn ChatProvider>> =
            vec![Arc::new(Accepting("a")), Arc::new(Accepting("b")), Arc::new(Accepting("c"))];
        let strategy = LoadBalancedStrategy::new();
        let first = strategy.candidates(&req("m"), &providers);
        let second = strategy.candidates(&req("m"), &providers);
        assert_ne!(first[0].name(), second[0].name());
    }
}
