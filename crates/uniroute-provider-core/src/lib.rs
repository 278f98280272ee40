pub mod credential;
pub mod provider;
pub mod traffic;

pub use credential::ProviderKeyPool;
pub use provider::{ChatProvider, ProviderCallCtx, ProviderError};
pub use traffic::{AccountingSink, ChannelAccountingSink, NoopAccountingSink, SharedAccountingSink, UsageEvent};

use std::collections::HashMap;
use std::sync::Arc;

/// The set of registered provider adapters (spec §4.3 "ProviderSet").
/// Insertion order is preserved because several routing strategies
/// (model-based fallback, cost-based tie-break by declared priority)
/// depend on registration order as the priority order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    order: Vec<String>,
    providers: HashMap<String, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(name).cloned()
    }

    /// All providers, in registration order.
    pub fn all(&self) -> Vec<Arc<dyn ChatProvider>> {
        self.order
            .iter()
            .filter_map(|name| self.providers.get(name).cloned())
            .collect()
    }

    pub fn accepting(&self, model: &str) -> Vec<Arc<dyn ChatProvider>> {
        self.all()
            .into_iter()
            .filter(|p| p.accepts_model(model))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatProvider, ProviderCallCtx, ProviderError};
    use async_trait::async_trait;
    use uniroute_protocol::{ChatRequest, ChatResponse};

    struct StubProvider(&'static str);

    #[async_trait]
    impl ChatProvider for StubProvider {
        fn name(&self) -> &str {
            self.0
        }
        fn accepts_model(&self, model: &str) -> bool {
            model == "m"
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

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("b")));
        registry.register(Arc::new(StubProvider("a")));
        let names: Vec<_> = registry.all().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
