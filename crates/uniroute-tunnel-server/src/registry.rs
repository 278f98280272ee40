//! The tunnel registry (spec §4.4, §5 "registry lock only for
//! insertion/removal, per-tunnel lock for mutable fields"): a
//! `RwLock<HashMap>` keyed by subdomain/custom-domain/id, with each entry's
//! mutable state (status, counters, control sender, disconnect queue) behind
//! its own `Mutex` so concurrent public requests against *different*
//! tunnels never contend on one lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use uniroute_protocol::tunnel::ControlFrame;
use uniroute_protocol::tunnel::TunnelProtocolKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Active,
    Disconnected,
    Paused,
    Closed,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TunnelCounters {
    pub requests: u64,
    pub errors: u64,
    pub bytes: u64,
}

pub struct TunnelEntry {
    pub tunnel_id: String,
    pub db_id: i64,
    pub user_id: i64,
    pub subdomain: String,
    pub custom_domain: Option<String>,
    pub protocol: TunnelProtocolKind,
    pub public_port: Option<u16>,
    pub local_url: Mutex<String>,
    pub status: Mutex<TunnelStatus>,
    pub control: Mutex<Option<tokio::sync::mpsc::Sender<ControlFrame>>>,
    pub queue: Mutex<VecDeque<ControlFrame>>,
    pub queue_capacity: usize,
    pub counters: Mutex<TunnelCounters>,
    pub grace_deadline: Mutex<Option<Instant>>,
}

pub enum ForwardError {
    NotConnected,
    QueueFull,
}

impl TunnelEntry {
    /// Sends `frame` on the live control channel, or queues it while the
    /// tunnel is in its disconnect grace window (spec §4.4 "Disconnection
    /// and grace period").
    pub fn forward(&self, frame: ControlFrame) -> Result<(), ForwardError> {
        let status = *self.status.lock().expect("tunnel status mutex poisoned");
        if status == TunnelStatus::Closed {
            return Err(ForwardError::NotConnected);
        }

        let sender = self.control.lock().expect("tunnel control mutex poisoned").clone();
        match sender {
            Some(tx) => tx.try_send(frame).map_err(|_| ForwardError::NotConnected),
            None => {
                let mut queue = self.queue.lock().expect("tunnel queue mutex poisoned");
                if queue.len() >= self.queue_capacity {
                    return Err(ForwardError::QueueFull);
                }
                queue.push_back(frame);
                Ok(())
            }
        }
    }

    /// Rebinds this entry to a freshly-accepted control connection, draining
    /// any frames queued during the grace window in arrival order.
    pub fn rebind(&self, sender: tokio::sync::mpsc::Sender<ControlFrame>) {
        *self.status.lock().expect("tunnel status mutex poisoned") = TunnelStatus::Active;
        *self.grace_deadline.lock().expect("tunnel grace mutex poisoned") = None;
        let queued: Vec<ControlFrame> =
            self.queue.lock().expect("tunnel queue mutex poisoned").drain(..).collect();
        for frame in queued {
            let _ = sender.try_send(frame);
        }
        *self.control.lock().expect("tunnel control mutex poisoned") = Some(sender);
    }

    pub fn mark_disconnected(&self, grace: std::time::Duration) {
        *self.control.lock().expect("tunnel control mutex poisoned") = None;
        *self.status.lock().expect("tunnel status mutex poisoned") = TunnelStatus::Disconnected;
        *self.grace_deadline.lock().expect("tunnel grace mutex poisoned") = Some(Instant::now() + grace);
    }

    pub fn record_success(&self, bytes: u64) {
        let mut counters = self.counters.lock().expect("tunnel counters mutex poisoned");
        counters.requests += 1;
        counters.bytes += bytes;
    }

    pub fn record_error(&self) {
        let mut counters = self.counters.lock().expect("tunnel counters mutex poisoned");
        counters.requests += 1;
        counters.errors += 1;
    }

    /// Drains and fails every queued frame with a synthetic 503 (used when
    /// the grace window elapses without a resume).
    pub fn drain_queue(&self) -> Vec<ControlFrame> {
        self.queue.lock().expect("tunnel queue mutex poisoned").drain(..).collect()
    }
}

#[derive(Default)]
pub struct TunnelRegistry {
    by_subdomain: RwLock<HashMap<String, Arc<TunnelEntry>>>,
    by_custom_domain: RwLock<HashMap<String, Arc<TunnelEntry>>>,
    by_id: RwLock<HashMap<String, Arc<TunnelEntry>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: Arc<TunnelEntry>) {
        self.by_id.write().expect("registry lock poisoned").insert(entry.tunnel_id.clone(), entry.clone());
        self.by_subdomain
            .write()
            .expect("registry lock poisoned")
            .insert(entry.subdomain.clone(), entry.clone());
        if let Some(domain) = &entry.custom_domain {
            self.by_custom_domain.write().expect("registry lock poisoned").insert(domain.clone(), entry);
        }
    }

    pub fn remove(&self, tunnel_id: &str) {
        let entry = self.by_id.write().expect("registry lock poisoned").remove(tunnel_id);
        if let Some(entry) = entry {
            self.by_subdomain.write().expect("registry lock poisoned").remove(&entry.subdomain);
            if let Some(domain) = &entry.custom_domain {
                self.by_custom_domain.write().expect("registry lock poisoned").remove(domain);
            }
        }
    }

    pub fn get_by_id(&self, tunnel_id: &str) -> Option<Arc<TunnelEntry>> {
        self.by_id.read().expect("registry lock poisoned").get(tunnel_id).cloned()
    }

    pub fn get_by_subdomain(&self, subdomain: &str) -> Option<Arc<TunnelEntry>> {
        self.by_subdomain.read().expect("registry lock poisoned").get(subdomain).cloned()
    }

    pub fn get_by_host(&self, host: &str) -> Option<Arc<TunnelEntry>> {
        self.by_custom_domain.read().expect("registry lock poisoned").get(host).cloned()
    }

    pub fn subdomain_taken(&self, subdomain: &str) -> bool {
        self.by_subdomain.read().expect("registry lock poisoned").contains_key(subdomain)
    }

    pub fn all(&self) -> Vec<Arc<TunnelEntry>> {
        self.by_id.read().expect("registry lock poisoned").values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(subdomain: &str) -> Arc<TunnelEntry> {
        Arc::new(TunnelEntry {
            tunnel_id: subdomain.to_string(),
            db_id: 1,
            user_id: 1,
            subdomain: subdomain.to_string(),
            custom_domain: None,
            protocol: TunnelProtocolKind::Http,
            public_port: None,
            local_url: Mutex::new("http://127.0.0.1:3000".to_string()),
            status: Mutex::new(TunnelStatus::Active),
            control: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: 2,
            counters: Mutex::new(TunnelCounters::default()),
            grace_deadline: Mutex::new(None),
        })
    }

    #[test]
    fn forward_queues_while_disconnected_and_rejects_past_capacity() {
        let entry = make_entry("abc12345");
        entry.mark_disconnected(std::time::Duration::from_secs(300));

        let frame = |id: u8| ControlFrame::Ping { timestamp: id as i64 };
        assert!(entry.forward(frame(1)).is_ok());
        assert!(entry.forward(frame(2)).is_ok());
        assert!(matches!(entry.forward(frame(3)), Err(ForwardError::QueueFull)));
    }

    #[test]
    fn rebind_drains_queue_in_order() {
        let entry = make_entry("def67890");
        entry.mark_disconnected(std::time::Duration::from_secs(300));
        entry.forward(ControlFrame::Ping { timestamp: 1 }).unwrap();
        entry.forward(ControlFrame::Ping { timestamp: 2 }).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        entry.rebind(tx);

        assert!(matches!(rx.try_recv().unwrap(), ControlFrame::Ping { timestamp: 1 }));
        assert!(matches!(rx.try_recv().unwrap(), ControlFrame::Ping { timestamp: 2 }));
        assert_eq!(*entry.status.lock().unwrap(), TunnelStatus::Active);
    }

    #[test]
    fn registry_lookup_by_subdomain_and_removal() {
        let registry = TunnelRegistry::new();
        let entry = make_entry("ghijklmn");
        registry.insert(entry.clone());

        assert!(registry.get_by_subdomain("ghijklmn").is_some());
        assert!(registry.subdomain_taken("ghijklmn"));

        registry.remove(&entry.tunnel_id);
        assert!(registry.get_by_subdomain("ghijklmn").is_none());
    }
}
