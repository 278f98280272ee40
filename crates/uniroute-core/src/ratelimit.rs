//! Rate limiting (spec §4.8): an abstract atomic-counter backend keyed by
//! `(subject, window)` with fixed calendar buckets (UTC minute, UTC day).
//! `InMemoryCounterBackend` is the ambient, works-out-of-the-box
//! implementation; a production deployment can swap in a Redis-backed
//! `CounterBackend` without touching the gateway middleware.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Minute,
    Day,
}

impl Window {
    fn ttl(self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Day => Duration::from_secs(86_400),
        }
    }

    /// The fixed calendar bucket identifier this instant falls into, so
    /// concurrent callers in the same minute/day share one counter.
    fn bucket(self, now: OffsetDateTime) -> i64 {
        match self {
            Window::Minute => now.unix_timestamp() / 60,
            Window::Day => now.date().to_julian_day() as i64,
        }
    }
}

pub trait CounterBackend: Send + Sync {
    /// Atomically increments the counter for `(subject, window)` and
    /// reports whether the post-increment count is within `limit`.
    /// Returns `(count, allowed)`.
    fn incr_and_check(&self, subject: &str, window: Window, limit: u32) -> (u32, bool);

    fn remaining(&self, subject: &str, window: Window, limit: u32) -> u32;
}

struct Counter {
    bucket: i64,
    count: u32,
    expires_at: Instant,
}

/// Sharded `Mutex<HashMap>` with lazy TTL eviction: a bucket rolls over the
/// moment a request observes a newer calendar bucket than the one stored,
/// rather than via a background sweep.
#[derive(Default)]
pub struct InMemoryCounterBackend {
    shards: Vec<Mutex<HashMap<(String, Window), Counter>>>,
}

const SHARD_COUNT: usize = 16;

impl InMemoryCounterBackend {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, subject: &str) -> &Mutex<HashMap<(String, Window), Counter>> {
        let hash = subject.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        &self.shards[(hash as usize) % self.shards.len()]
    }
}

impl CounterBackend for InMemoryCounterBackend {
    fn incr_and_check(&self, subject: &str, window: Window, limit: u32) -> (u32, bool) {
        let now_wall = OffsetDateTime::now_utc();
        let bucket = window.bucket(now_wall);
        let key = (subject.to_string(), window);

        let mut shard = self.shard_for(subject).lock().expect("counter shard mutex poisoned");
        let now = Instant::now();
        let entry = shard.entry(key).or_insert(Counter {
            bucket,
            count: 0,
            expires_at: now + window.ttl(),
        });

        if entry.bucket != bucket || now >= entry.expires_at {
            entry.bucket = bucket;
            entry.count = 0;
            entry.expires_at = now + window.ttl();
        }

        entry.count += 1;
        (entry.count, entry.count <= limit)
    }

    fn remaining(&self, subject: &str, window: Window, limit: u32) -> u32 {
        let bucket = window.bucket(OffsetDateTime::now_utc());
        let shard = self.shard_for(subject).lock().expect("counter shard mutex poisoned");
        let count = shard
            .get(&(subject.to_string(), window))
            .filter(|entry| entry.bucket == bucket)
            .map(|entry| entry.count)
            .unwrap_or(0);
        limit.saturating_sub(count)
    }
}

pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit_per_minute: u32,
    pub remaining_per_minute: u32,
    pub limit_per_day: u32,
    pub remaining_per_day: u32,
}

pub fn check(
    backend: &dyn CounterBackend,
    subject: &str,
    limit_per_minute: u32,
    limit_per_day: u32,
) -> RateLimitOutcome {
    let (minute_count, minute_ok) = backend.incr_and_check(subject, Window::Minute, limit_per_minute);
    let (day_count, day_ok) = backend.incr_and_check(subject, Window::Day, limit_per_day);

    RateLimitOutcome {
        allowed: minute_ok && day_ok,
        limit_per_minute,
        remaining_per_minute: limit_per_minute.saturating_sub(minute_count),
        limit_per_day,
        remaining_per_day: limit_per_day.saturating_sub(day_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_requests_succeed_and_kplus1_is_rejected() {
        let backend = InMemoryCounterBackend::new();
        for _ in 0..3 {
            let outcome = check(&backend, "key-1", 3, 10_000);
            assert!(outcome.allowed);
        }
        let outcome = check(&backend, "key-1", 3, 10_000);
        assert!(!outcome.allowed);
    }

    #[test]
    fn distinct_subjects_have_independent_counters() {
        let backend = InMemoryCounterBackend::new();
        for _ in 0..5 {
            assert!(check(&backend, "a", 5, 10_000).allowed);
        }
        assert!(check(&backend, "b", 5, 10_000).allowed);
    }

    #[test]
    fn remaining_reflects_increments_within_the_same_bucket() {
        let backend = InMemoryCounterBackend::new();
        check(&backend, "key-2", 10, 10_000);
        check(&backend, "key-2", 10, 10_000);
        assert_eq!(backend.remaining("key-2", Window::Minute, 10), 8);
    }
}
