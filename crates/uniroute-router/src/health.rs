//! Provider health cache (spec §4.2 "skipped without attempt", §4.3 "health
//! check"): refreshed lazily on a 30-second interval or immediately after a
//! failed call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

pub(crate) const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    healthy: bool,
    checked_at: Instant,
}

#[derive(Default)]
pub struct HealthCache {
    entries: ArcSwap<HashMap<String, HealthEntry>>,
}

impl HealthCache {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// `true` if the provider was last observed healthy and the probe is
    /// still within the refresh interval, or if it has never been probed
    /// (optimistic default — an unprobed provider is attempted, not
    /// skipped).
    pub fn is_healthy(&self, provider: &str) -> bool {
        match self.entries.load().get(provider) {
            Some(entry) => entry.healthy || entry.checked_at.elapsed() >= REFRESH_INTERVAL,
            None => true,
        }
    }

    pub fn needs_refresh(&self, provider: &str) -> bool {
        match self.entries.load().get(provider) {
            Some(entry) => entry.checked_at.elapsed() >= REFRESH_INTERVAL,
            None => true,
        }
    }

    pub fn record(&self, provider: &str, healthy: bool) {
        let mut next = (**self.entries.load()).clone();
        next.insert(
            provider.to_string(),
            HealthEntry {
                healthy,
                checked_at: Instant::now(),
            },
        );
        self.entries.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprobed_provider_is_treated_as_healthy() {
        let cache = HealthCache::new();
        assert!(cache.is_healthy("unknown"));
    }

    #[test]
    fn recorded_unhealthy_is_skipped_until_refresh_interval() {
        let cache = HealthCache::new();
        cache.record("p", false);
        assert!(!cache.is_healthy("p"));
    }

    #[test]
    fn recorded_healthy_stays_healthy() {
        let cache = HealthCache::new();
        cache.record("p", true);
        assert!(cache.is_healthy("p"));
    }
}
