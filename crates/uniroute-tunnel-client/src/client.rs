//! The tunnel client's connection lifecycle (spec §4.4 "TunnelClient"): one
//! persistent control WebSocket, exponential-backoff reconnect, and a
//! bounded outbound queue so a slow server write never unboundedly buffers
//! local traffic in memory.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use uniroute_protocol::tunnel::{ControlFrame, TunnelProtocolKind};

use crate::local::LocalForwarder;
use crate::state::{PersistedState, StateFile};

const OUTBOUND_QUEUE_CAPACITY: usize = 100;
const MIN_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub control_url: String,
    pub local_url: String,
    pub token: Option<String>,
    pub requested_subdomain: Option<String>,
    pub protocol: TunnelProtocolKind,
    pub state_path: std::path::PathBuf,
    pub local_timeout: Duration,
}

/// A ring buffer that drops the oldest queued frame (warning when it does)
/// rather than growing unbounded or blocking the writer loop, since a
/// wedged server write should not back-pressure local request handling
/// indefinitely.
struct OutboundQueue {
    frames: Mutex<VecDeque<ControlFrame>>,
    notify: Notify,
}

impl OutboundQueue {
    fn new() -> Self {
        Self { frames: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    fn push(&self, frame: ControlFrame) {
        let mut frames = self.frames.lock().expect("outbound queue mutex poisoned");
        if frames.len() >= OUTBOUND_QUEUE_CAPACITY {
            frames.pop_front();
            tracing::warn!(event = "tunnel_client_outbound_overflow", "dropping oldest queued frame");
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
    }

    async fn pop(&self) -> ControlFrame {
        loop {
            if let Some(frame) = self.frames.lock().expect("outbound queue mutex poisoned").pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

pub struct TunnelClient {
    config: ClientConfig,
    state_file: StateFile,
}

impl TunnelClient {
    pub fn new(config: ClientConfig) -> Self {
        let state_file = StateFile::new(config.state_path.clone());
        Self { config, state_file }
    }

    /// Runs forever, reconnecting with jittered exponential backoff
    /// (5s..60s) after any connection failure.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut backoff = MIN_BACKOFF;
        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    tracing::info!(event = "tunnel_client_session_ended", "control connection closed cleanly");
                    backoff = MIN_BACKOFF;
                }
                Err(err) => {
                    tracing::warn!(event = "tunnel_client_disconnected", error = %err, "control connection failed");
                }
            }

            let jitter = Duration::from_millis(rand::rng().random_range(0..1000));
            tokio::time::sleep(backoff + jitter).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect_and_serve(&self) -> anyhow::Result<()> {
        let persisted = self.state_file.load().await;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.config.control_url).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let init = ControlFrame::Init {
            version: 1,
            local_url: self.config.local_url.clone(),
            token: self.config.token.clone(),
            subdomain: self.config.requested_subdomain.clone(),
            tunnel_id: persisted.as_ref().map(|p| p.tunnel_id.clone()),
            protocol: self.config.protocol,
        };
        send_frame(&mut sink, &init).await?;

        let created = match tokio::time::timeout(HANDSHAKE_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => ControlFrame::from_json_bytes(text.as_bytes())?,
            Ok(Some(Err(err))) => return Err(err.into()),
            Ok(_) => anyhow::bail!("control connection closed during handshake"),
            Err(_) => anyhow::bail!("handshake timed out"),
        };

        let (tunnel_id, subdomain, public_url) = match created {
            ControlFrame::TunnelCreated { tunnel_id, subdomain, public_url, .. } => (tunnel_id, subdomain, public_url),
            ControlFrame::Error { code, message } => anyhow::bail!("server rejected init ({code}): {message}"),
            _ => anyhow::bail!("unexpected frame during handshake"),
        };

        tracing::info!(
            event = "tunnel_client_connected",
            tunnel_id = %tunnel_id,
            public_url = %public_url,
            "tunnel established"
        );
        if let Err(err) = self
            .state_file
            .save(&PersistedState { tunnel_id, subdomain, public_url })
            .await
        {
            tracing::warn!(event = "tunnel_client_state_save_failed", error = %err);
        }

        let mut forwarder = LocalForwarder::new(self.config.local_url.clone(), self.config.local_timeout)?;
        forwarder.set_local_url(self.config.local_url.clone());
        let forwarder = std::sync::Arc::new(forwarder);

        let outbound = std::sync::Arc::new(OutboundQueue::new());

        let writer_queue = outbound.clone();
        let writer = tokio::spawn(async move {
            loop {
                let frame = writer_queue.pop().await;
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
        });

        let result = self.read_loop(&mut stream, forwarder, outbound).await;
        writer.abort();
        result
    }

    async fn read_loop(
        &self,
        stream: &mut (impl futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
        forwarder: std::sync::Arc<LocalForwarder>,
        outbound: std::sync::Arc<OutboundQueue>,
    ) -> anyhow::Result<()> {
        loop {
            let message = stream.next().await;
            match message {
                Some(Ok(Message::Text(text))) => {
                    let frame = match ControlFrame::from_json_bytes(text.as_bytes()) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    self.handle_inbound_frame(frame, &forwarder, &outbound);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    fn handle_inbound_frame(
        &self,
        frame: ControlFrame,
        forwarder: &std::sync::Arc<LocalForwarder>,
        outbound: &std::sync::Arc<OutboundQueue>,
    ) {
        match frame {
            ControlFrame::HttpRequest { request_id, method, path, query, headers, body } => {
                let forwarder = forwarder.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    match forwarder.forward(&method, &path, query.as_deref(), &headers, &body).await {
                        Ok(response) => {
                            outbound.push(ControlFrame::HttpResponse {
                                request_id,
                                status: response.status,
                                headers: response.headers,
                                body: response.body,
                            });
                        }
                        Err(message) => {
                            outbound.push(ControlFrame::HttpError {
                                request_id,
                                error: "upstream_unreachable".to_string(),
                                message,
                            });
                        }
                    }
                });
            }
            ControlFrame::Ping { timestamp } => {
                outbound.push(ControlFrame::Pong { timestamp });
            }
            _ => {}
        }
    }
}

async fn send_frame(
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    frame: &ControlFrame,
) -> anyhow::Result<()> {
    let text = String::from_utf8(frame.to_json_bytes()).expect("control frames are always valid utf8 json");
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}
