//! The RequestTracker (spec §4.9): a process-local concurrent map from
//! `RequestId` to a one-shot waiter, correlating an inbound public HTTP
//! request with the eventual `http_response`/`http_error` frame from the
//! owning tunnel client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uniroute_protocol::tunnel::{OrderedHeaders, WireBody};
use uniroute_protocol::RequestId;

/// What a waiter is eventually resolved with. `Timeout`/`TunnelClosed` are
/// synthesized by the tracker itself rather than arriving as a frame.
#[derive(Debug, Clone)]
pub enum WaiterOutcome {
    Response {
        status: u16,
        headers: OrderedHeaders,
        body: WireBody,
    },
    UpstreamError {
        error: String,
        message: String,
    },
    Timeout,
    TunnelClosed,
}

struct Waiter {
    sender: oneshot::Sender<WaiterOutcome>,
    tunnel_id: String,
    deadline: Instant,
}

/// Default public-request wait: spec.md §4.4 step 6 / §5 "Timeouts".
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const REAP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct RequestTracker {
    waiters: Mutex<HashMap<RequestId, Waiter>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically creates and registers a waiter with `timeout` from now, so
    /// no frame arriving between generation and registration can be lost.
    pub fn register(
        &self,
        request_id: RequestId,
        tunnel_id: impl Into<String>,
        timeout: Duration,
    ) -> oneshot::Receiver<WaiterOutcome> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            sender: tx,
            tunnel_id: tunnel_id.into(),
            deadline: Instant::now() + timeout,
        };
        self.waiters.lock().expect("request tracker mutex poisoned").insert(request_id, waiter);
        rx
    }

    /// Delivers `outcome` to the waiter for `request_id` and deregisters it.
    /// A late arrival for an id that was already completed, reaped, or never
    /// registered is silently dropped (spec §4.9 invariant).
    pub fn complete(&self, request_id: RequestId, outcome: WaiterOutcome) -> bool {
        let waiter = self.waiters.lock().expect("request tracker mutex poisoned").remove(&request_id);
        match waiter {
            Some(waiter) => waiter.sender.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Explicit removal without delivery, used when the public client
    /// disconnects and the handler stops waiting (spec §5 "Cancellation").
    pub fn deregister(&self, request_id: RequestId) {
        self.waiters.lock().expect("request tracker mutex poisoned").remove(&request_id);
    }

    /// Delivers `TunnelClosed` to every outstanding waiter belonging to
    /// `tunnel_id` and removes them (spec §5 "Tunnel teardown cancels all
    /// outstanding waiters").
    pub fn cancel_tunnel(&self, tunnel_id: &str) {
        let mut waiters = self.waiters.lock().expect("request tracker mutex poisoned");
        let ids: Vec<RequestId> = waiters
            .iter()
            .filter(|(_, w)| w.tunnel_id == tunnel_id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(waiter) = waiters.remove(&id) {
                let _ = waiter.sender.send(WaiterOutcome::TunnelClosed);
            }
        }
    }

    /// Evicts waiters whose deadline has elapsed, delivering a synthetic
    /// `Timeout` so the public handler can't wait forever. Called by
    /// `spawn_reaper`'s interval loop; exposed separately for tests.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut waiters = self.waiters.lock().expect("request tracker mutex poisoned");
        let expired: Vec<RequestId> = waiters
            .iter()
            .filter(|(_, w)| w.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let count = expired.len();
        for id in expired {
            if let Some(waiter) = waiters.remove(&id) {
                let _ = waiter.sender.send(WaiterOutcome::Timeout);
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().expect("request tracker mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns the 30s reap sweep (spec §4.9). The returned handle is aborted on
/// process shutdown by dropping it or calling `.abort()`.
pub fn spawn_reaper(tracker: std::sync::Arc<RequestTracker>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            let reaped = tracker.reap_expired();
            if reaped > 0 {
                tracing::debug!(event = "request_tracker_reap", reaped, "evicted expired waiters");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_delivers_exactly_once() {
        let tracker = RequestTracker::new();
        let id = RequestId::new_random();
        let rx = tracker.register(id, "tunnel-a", Duration::from_secs(5));

        assert!(tracker.complete(
            id,
            WaiterOutcome::Response {
                status: 200,
                headers: OrderedHeaders::new(),
                body: WireBody::default(),
            }
        ));
        assert!(matches!(rx.await.unwrap(), WaiterOutcome::Response { status: 200, .. }));
        assert_eq!(tracker.len(), 0);
    }

    #[tokio::test]
    async fn completing_unknown_id_is_silently_dropped() {
        let tracker = RequestTracker::new();
        let id = RequestId::new_random();
        assert!(!tracker.complete(id, WaiterOutcome::Timeout));
    }

    #[tokio::test]
    async fn late_completion_after_reap_is_dropped() {
        let tracker = RequestTracker::new();
        let id = RequestId::new_random();
        let rx = tracker.register(id, "tunnel-a", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(tracker.reap_expired(), 1);
        assert!(matches!(rx.await.unwrap(), WaiterOutcome::Timeout));

        assert!(!tracker.complete(id, WaiterOutcome::Timeout));
    }

    #[tokio::test]
    async fn cancel_tunnel_only_affects_its_own_waiters() {
        let tracker = RequestTracker::new();
        let a = RequestId::new_random();
        let b = RequestId::new_random();
        let rx_a = tracker.register(a, "tunnel-a", Duration::from_secs(5));
        let rx_b = tracker.register(b, "tunnel-b", Duration::from_secs(5));

        tracker.cancel_tunnel("tunnel-a");

        assert!(matches!(rx_a.await.unwrap(), WaiterOutcome::TunnelClosed));
        assert_eq!(tracker.len(), 1);
        drop(rx_b);
    }
}
