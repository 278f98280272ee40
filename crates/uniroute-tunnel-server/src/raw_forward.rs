//! Raw byte forwarding for TCP/TLS/UDP tunnels (spec §4.4 "TCP / TLS / UDP
//! tunnels"): traffic is not JSON-framed like HTTP; it is forwarded
//! verbatim through a second, per-tunnel multiplexed binary WebSocket
//! between server and client. Each message on that socket is a 4-byte
//! big-endian stream id followed by the raw payload for that stream; a
//! zero-length payload for a stream id signals that stream's peer closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

const READ_CHUNK: usize = 16 * 1024;

/// Frames a stream id + payload for the multiplexed data socket.
pub fn encode_frame(stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&stream_id.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub fn decode_frame(bytes: &[u8]) -> Option<(u32, &[u8])> {
    if bytes.len() < 4 {
        return None;
    }
    let (head, body) = bytes.split_at(4);
    Some((u32::from_be_bytes([head[0], head[1], head[2], head[3]]), body))
}

/// Routes inbound bytes from the client's data socket back to the local
/// TCP/UDP connection that originated a stream, and hands the data socket's
/// sender to new streams so they can forward bytes the other way.
#[derive(Default)]
pub struct DataHub {
    next_stream_id: AtomicU32,
    streams: Mutex<HashMap<u32, mpsc::Sender<Vec<u8>>>>,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
}

impl DataHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outbound(&self, sender: mpsc::Sender<Vec<u8>>) {
        *self.outbound.lock().expect("data hub mutex poisoned") = Some(sender);
    }

    pub fn clear_outbound(&self) {
        *self.outbound.lock().expect("data hub mutex poisoned") = None;
    }

    fn allocate_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, stream_id: u32, tx: mpsc::Sender<Vec<u8>>) {
        self.streams.lock().expect("data hub mutex poisoned").insert(stream_id, tx);
    }

    fn unregister(&self, stream_id: u32) {
        self.streams.lock().expect("data hub mutex poisoned").remove(&stream_id);
    }

    /// Dispatches a frame received from the client's data socket to the
    /// matching local stream, if it's still open.
    pub fn dispatch_inbound(&self, stream_id: u32, payload: Vec<u8>) {
        let sender = self.streams.lock().expect("data hub mutex poisoned").get(&stream_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(payload);
        }
    }

    fn send_to_client(&self, stream_id: u32, payload: &[u8]) -> bool {
        let outbound = self.outbound.lock().expect("data hub mutex poisoned").clone();
        match outbound {
            Some(tx) => tx.try_send(encode_frame(stream_id, payload)).is_ok(),
            None => false,
        }
    }
}

/// Accepts raw TCP connections on `port` and pipes each one through the hub
/// as its own multiplexed stream.
pub async fn run_tcp_listener(hub: Arc<DataHub>, bind_host: String, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((bind_host.as_str(), port)).await?;
    loop {
        let (socket, _peer) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            handle_tcp_stream(hub, socket).await;
        });
    }
}

async fn handle_tcp_stream(hub: Arc<DataHub>, mut socket: tokio::net::TcpStream) {
    let stream_id = hub.allocate_stream_id();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
    hub.register(stream_id, tx);

    let mut read_buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            read = socket.read(&mut read_buf) => {
                match read {
                    Ok(0) | Err(_) => {
                        hub.send_to_client(stream_id, &[]);
                        break;
                    }
                    Ok(n) => {
                        if !hub.send_to_client(stream_id, &read_buf[..n]) {
                            break;
                        }
                    }
                }
            }
            forwarded = rx.recv() => {
                match forwarded {
                    Some(bytes) if bytes.is_empty() => break,
                    Some(bytes) => {
                        if socket.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    hub.unregister(stream_id);
}

/// Binds a UDP socket on `port`; each distinct peer address is treated as
/// its own stream, keyed by a stream id assigned on first datagram.
pub async fn run_udp_listener(hub: Arc<DataHub>, bind_host: String, port: u16) -> std::io::Result<()> {
    let socket = Arc::new(UdpSocket::bind((bind_host.as_str(), port)).await?);
    let peers: Arc<Mutex<HashMap<u32, std::net::SocketAddr>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await?;
        let existing = {
            let guard = peers.lock().expect("udp peer map poisoned");
            guard.iter().find(|(_, addr)| **addr == peer).map(|(id, _)| *id)
        };
        let stream_id = match existing {
            Some(id) => id,
            None => {
                let id = hub.allocate_stream_id();
                peers.lock().expect("udp peer map poisoned").insert(id, peer);

                let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);
                hub.register(id, tx);

                let reply_socket = socket.clone();
                let hub_for_task = hub.clone();
                let peers_for_task = peers.clone();
                tokio::spawn(async move {
                    while let Some(bytes) = rx.recv().await {
                        if bytes.is_empty() {
                            break;
                        }
                        let _ = reply_socket.send_to(&bytes, peer).await;
                    }
                    hub_for_task.unregister(id);
                    peers_for_task.lock().expect("udp peer map poisoned").remove(&id);
                });
                id
            }
        };
        hub.send_to_client(stream_id, &buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let encoded = encode_frame(42, b"hello");
        let (id, payload) = decode_frame(&encoded).unwrap();
        assert_eq!(id, 42);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn decode_rejects_short_buffers() {
        assert!(decode_frame(&[1, 2, 3]).is_none());
    }

    #[tokio::test]
    async fn dispatch_inbound_delivers_to_registered_stream() {
        let hub = DataHub::new();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register(7, tx);
        hub.dispatch_inbound(7, b"payload".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b"payload".to_vec());
    }
}
