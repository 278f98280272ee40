//! Per-provider rolling latency window (spec §3 "RoutingStrategy state",
//! §4.2 "Latency tracker"): a ring of the last N=100 sampled durations with
//! maintained min/max/sum so the average is constant time.

use std::collections::HashMap;
use std::sync::Mutex;

const WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyStats {
    pub samples: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: u64,
}

struct Ring {
    buf: Vec<u64>,
    next: usize,
    sum: u64,
}

impl Ring {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(WINDOW),
            next: 0,
            sum: 0,
        }
    }

    fn push(&mut self, sample_ms: u64) {
        if self.buf.len() < WINDOW {
            self.buf.push(sample_ms);
            self.sum += sample_ms;
        } else {
            let evicted = self.buf[self.next];
            self.buf[self.next] = sample_ms;
            self.sum = self.sum - evicted + sample_ms;
            self.next = (self.next + 1) % WINDOW;
        }
    }

    fn stats(&self) -> LatencyStats {
        if self.buf.is_empty() {
            return LatencyStats::default();
        }
        LatencyStats {
            samples: self.buf.len(),
            min_ms: self.buf.iter().copied().min().unwrap_or(0),
            max_ms: self.buf.iter().copied().max().unwrap_or(0),
            avg_ms: self.sum / self.buf.len() as u64,
        }
    }
}

/// Thread-safe, eventually-consistent per-provider latency tracker.
#[derive(Default)]
pub struct LatencyTracker {
    rings: Mutex<HashMap<String, Ring>>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, provider: &str, sample_ms: u64) {
        let mut guard = self.rings.lock().expect("latency tracker lock poisoned");
        guard
            .entry(provider.to_string())
            .or_insert_with(Ring::new)
            .push(sample_ms);
    }

    pub fn stats(&self, provider: &str) -> LatencyStats {
        let guard = self.rings.lock().expect("latency tracker lock poisoned");
        guard.get(provider).map(Ring::stats).unwrap_or_default()
    }

    pub fn all_stats(&self) -> HashMap<String, LatencyStats> {
        let guard = self.rings.lock().expect("latency tracker lock poisoned");
        guard.iter().map(|(k, v)| (k.clone(), v.stats())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_exact_for_partial_window() {
        let tracker = LatencyTracker::new();
        for sample in [10, 20, 30] {
            tracker.record("p", sample);
        }
        let stats = tracker.stats("p");
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.min_ms, 10);
        assert_eq!(stats.max_ms, 30);
        assert_eq!(stats.avg_ms, 20);
    }

    #[test]
    fn ring_evicts_oldest_past_window() {
        let tracker = LatencyTracker::new();
        for sample in 0..150u64 {
            tracker.record("p", sample);
        }
        let stats = tracker.stats("p");
        assert_eq!(stats.samples, 100);
        // The oldest 50 samples (0..50) must have been evicted.
        assert_eq!(stats.min_ms, 50);
        assert_eq!(stats.max_ms, 149);
    }

    #[test]
    fn unknown_provider_has_zero_stats() {
        let tracker = LatencyTracker::new();
        let stats = tracker.stats("nope");
        assert_eq!(stats.samples, 0);
    }
}
