//! Price table and cost estimation (spec §3, §4.2 "Cost calculator").

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use uniroute_protocol::{ChatRequest, ChatUsage};

#[derive(Debug, Clone, Copy, Default)]
pub struct Price {
    pub per_million_input: f64,
    pub per_million_output: f64,
}

#[derive(Default)]
pub struct CostCalculator {
    table: ArcSwap<HashMap<(String, String), Price>>,
}

impl CostCalculator {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn set_price(&self, provider: &str, model: &str, price: Price) {
        let mut next = (**self.table.load()).clone();
        next.insert((provider.to_string(), model.to_string()), price);
        self.table.store(Arc::new(next));
    }

    fn price_for(&self, provider: &str, model: &str, default: Price) -> Price {
        self.table
            .load()
            .get(&(provider.to_string(), model.to_string()))
            .copied()
            .unwrap_or(default)
    }

    /// Approximates cost from `request.estimated_input_tokens()` before an
    /// upstream call returns actual usage.
    pub fn estimate(&self, provider: &str, request: &ChatRequest, default: Price) -> f64 {
        let price = self.price_for(provider, &request.model, default);
        (request.estimated_input_tokens() as f64 / 1_000_000.0) * price.per_million_input
    }

    /// Computes exact cost from the upstream's returned `usage`.
    pub fn actual(&self, provider: &str, model: &str, usage: &ChatUsage, default: Price) -> f64 {
        let price = self.price_for(provider, model, default);
        (usage.prompt_tokens as f64 / 1_000_000.0) * price.per_million_input
            + (usage.completion_tokens as f64 / 1_000_000.0) * price.per_million_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniroute_protocol::{ChatMessage, ChatRole};

    #[test]
    fn estimate_uses_overridden_price_over_default() {
        let calc = CostCalculator::new();
        calc.set_price(
            "openai",
            "gpt-4",
            Price {
                per_million_input: 10.0,
                per_million_output: 30.0,
            },
        );
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "x".repeat(4_000_000),
            }],
            temperature: None,
            max_tokens: None,
        };
        let cost = calc.estimate("openai", &request, Price::default());
        assert!((cost - 10.0).abs() < 1e-9);
    }

    #[test]
    fn actual_cost_splits_input_and_output_price() {
        let calc = CostCalculator::new();
        let price = Price {
            per_million_input: 1.0,
            per_million_output: 2.0,
        };
        let usage = ChatUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
            total_tokens: 1_500_000,
        };
        let cost = calc.actual("p", "m", &usage, price);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn local_provider_default_price_is_free() {
        let calc = CostCalculator::new();
        let usage = ChatUsage {
            prompt_tokens: 1_000,
            completion_tokens: 1_000,
            total_tokens: 2_000,
        };
        let cost = calc.actual("local", "llama2", &usage, Price::default());
        assert_eq!(cost, 0.0);
    }
}
