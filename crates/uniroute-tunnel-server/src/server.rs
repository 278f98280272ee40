//! The tunnel server itself (spec §4.4): a control listener accepting the
//! persistent client→server WebSocket and a public listener serving
//! inbound traffic for HTTP (by subdomain/custom-domain host) and
//! TCP/TLS/UDP (by dynamically assigned port). Mirrors
//! `gproxy_admin::router::{events_ws, handle_events_ws}`'s
//! upgrade-then-`select!` shape, generalized to a bidirectional,
//! request-correlated frame stream instead of a one-way event fan-out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::HOST;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{Sink, SinkExt, StreamExt};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uniroute_common::{SecurityHeadersLayer, TunnelConfig};
use uniroute_protocol::tunnel::{
    sanitize_path, ControlFrame, OrderedHeaders, RequestId, WireBody, ALLOWED_METHODS,
    MAX_HEADER_BLOCK_BYTES, MAX_PATH_LEN,
};
use uniroute_protocol::tunnel::TunnelProtocolKind;
use uniroute_storage::{NewTunnel, Storage, StorageSnapshot, TunnelActivity};
use uniroute_tunnel_protocol::{spawn_reaper, RequestTracker, WaiterOutcome};

use crate::auth::TunnelTokenAuth;
use crate::domain::DomainManager;
use crate::ports::PortAllocator;
use crate::raw_forward::{self, DataHub};
use crate::registry::{ForwardError, TunnelCounters, TunnelEntry, TunnelRegistry, TunnelStatus};

pub struct TunnelServer {
    config: TunnelConfig,
    registry: Arc<TunnelRegistry>,
    tracker: Arc<RequestTracker>,
    domains: DomainManager,
    ports: PortAllocator,
    storage: Arc<dyn Storage>,
    auth: TunnelTokenAuth,
    data_hubs: Mutex<HashMap<String, Arc<DataHub>>>,
}

impl TunnelServer {
    pub fn new(
        config: TunnelConfig,
        storage: Arc<dyn Storage>,
        snapshot: Arc<ArcSwap<StorageSnapshot>>,
    ) -> Arc<Self> {
        let domains = DomainManager::new(config.base_domain.clone());
        let ports = PortAllocator::new(config.dynamic_port_range);
        let auth = TunnelTokenAuth::new(snapshot, config.auth_required);
        Arc::new(Self {
            registry: Arc::new(TunnelRegistry::new()),
            tracker: Arc::new(RequestTracker::new()),
            domains,
            ports,
            storage,
            auth,
            data_hubs: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Exposed for `uniroute-admin`'s tunnel inspection/replay endpoints
    /// (spec §6 "Public tunnel endpoints"), which need the same registry
    /// and request tracker this server's own handlers use.
    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Binds and serves both listeners until either fails; the reap sweep
    /// runs for the lifetime of the server.
    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let _reaper = spawn_reaper(self.tracker.clone());

        let control_listener =
            tokio::net::TcpListener::bind((self.config.control_host.as_str(), self.config.control_port)).await?;
        let public_listener =
            tokio::net::TcpListener::bind((self.config.public_host.as_str(), self.config.public_port)).await?;

        tracing::info!(
            event = "tunnel_server_listening",
            control_addr = %control_listener.local_addr()?,
            public_addr = %public_listener.local_addr()?,
            "tunnel server listening"
        );

        let control_router = Router::new()
            .route("/tunnel", get(control_ws_upgrade))
            .route("/data/{tunnel_id}", get(data_ws_upgrade))
            .with_state(self.clone())
            .layer(SecurityHeadersLayer);
        let public_router = Router::new()
            .fallback(handle_public_request)
            .with_state(self.clone())
            .layer(SecurityHeadersLayer);

        let control_fut = axum::serve(control_listener, control_router.into_make_service());
        let public_fut = axum::serve(public_listener, public_router.into_make_service());
        tokio::try_join!(control_fut, public_fut)?;
        Ok(())
    }

    fn protocol_str(protocol: TunnelProtocolKind) -> &'static str {
        match protocol {
            TunnelProtocolKind::Http => "http",
            TunnelProtocolKind::Tcp => "tcp",
            TunnelProtocolKind::Tls => "tls",
            TunnelProtocolKind::Udp => "udp",
        }
    }

    /// Attempts to resume `entry` for `user_id`: rejects tunnels owned by a
    /// different principal, and tunnels whose resume window (grace period)
    /// has already elapsed or that are fully closed. On success, rebinds
    /// the entry's local URL and returns it.
    fn try_resume(entry: Arc<TunnelEntry>, user_id: i64, local_url: String) -> Result<Arc<TunnelEntry>, String> {
        if entry.user_id != user_id {
            return Err("tunnel not owned by this principal".to_string());
        }
        let grace_elapsed = entry
            .grace_deadline
            .lock()
            .expect("grace deadline mutex poisoned")
            .map(|deadline| std::time::Instant::now() > deadline)
            .unwrap_or(false);
        let status = *entry.status.lock().expect("tunnel status mutex poisoned");
        if status == TunnelStatus::Closed || grace_elapsed {
            return Err("tunnel resume window elapsed".to_string());
        }
        *entry.local_url.lock().expect("local url mutex poisoned") = local_url;
        Ok(entry)
    }

    /// Resolves the init handshake into a live `TunnelEntry`: a resume if
    /// `tunnel_id` or `subdomain` names a still-gracing tunnel owned by the
    /// same principal, otherwise a freshly allocated one (spec §4.4 "Init
    /// handshake").
    async fn resolve_or_create_tunnel(
        &self,
        user_id: i64,
        requested_subdomain: Option<String>,
        requested_tunnel_id: Option<String>,
        protocol: TunnelProtocolKind,
        local_url: String,
    ) -> Result<Arc<TunnelEntry>, String> {
        if let Some(tunnel_id) = requested_tunnel_id {
            let entry = self.registry.get_by_id(&tunnel_id).ok_or("unknown tunnel_id for resume")?;
            return Self::try_resume(entry, user_id, local_url);
        }

        if let Some(requested) = &requested_subdomain {
            if let Some(entry) = self.registry.get_by_subdomain(requested) {
                return Self::try_resume(entry, user_id, local_url);
            }
        }

        let subdomain = match requested_subdomain {
            Some(requested) => {
                self.domains.validate_requested(&requested, &self.registry).map_err(|e| e.to_string())?;
                requested
            }
            None => self.domains.generate(&self.registry).map_err(|e| e.to_string())?,
        };

        let public_port = if protocol != TunnelProtocolKind::Http {
            Some(self.ports.allocate().map_err(|e| e.to_string())?)
        } else {
            None
        };

        let db_id = self
            .storage
            .create_tunnel(NewTunnel {
                user_id,
                subdomain: subdomain.clone(),
                custom_domain: None,
                protocol: Self::protocol_str(protocol).to_string(),
                public_port: public_port.map(|p| p as i32),
                local_url: local_url.clone(),
            })
            .await
            .map_err(|e| e.to_string())?;

        let tunnel_id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(TunnelEntry {
            tunnel_id: tunnel_id.clone(),
            db_id,
            user_id,
            subdomain,
            custom_domain: None,
            protocol,
            public_port,
            local_url: Mutex::new(local_url),
            status: Mutex::new(TunnelStatus::Active),
            control: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: self.config.disconnect_queue_capacity,
            counters: Mutex::new(TunnelCounters::default()),
            grace_deadline: Mutex::new(None),
        });
        self.registry.insert(entry.clone());

        if protocol != TunnelProtocolKind::Http {
            if let Some(port) = public_port {
                let hub = Arc::new(DataHub::new());
                self.data_hubs.lock().expect("data hub map poisoned").insert(tunnel_id.clone(), hub.clone());
                let bind_host = self.config.public_host.clone();
                match protocol {
                    TunnelProtocolKind::Udp => {
                        tokio::spawn(async move {
                            if let Err(err) = raw_forward::run_udp_listener(hub, bind_host, port).await {
                                tracing::warn!(event = "udp_listener_failed", %err);
                            }
                        });
                    }
                    _ => {
                        tokio::spawn(async move {
                            if let Err(err) = raw_forward::run_tcp_listener(hub, bind_host, port).await {
                                tracing::warn!(event = "tcp_listener_failed", %err);
                            }
                        });
                    }
                }
            }
        }

        Ok(entry)
    }

    /// Marks a tunnel disconnected and, unless it resumes within the grace
    /// period, frees its subdomain/port and cancels any outstanding waiters
    /// (spec §3 "closing a tunnel frees its subdomain... after a grace
    /// period").
    async fn on_tunnel_disconnected(self: &Arc<Self>, entry: Arc<TunnelEntry>) {
        let grace = Duration::from_secs(self.config.grace_period_secs);
        entry.mark_disconnected(grace);
        let _ = self.storage.set_tunnel_status(entry.db_id, "disconnected").await;

        let server = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_disconnected =
                *entry.status.lock().expect("tunnel status mutex poisoned") == TunnelStatus::Disconnected;
            if !still_disconnected {
                return;
            }
            server.registry.remove(&entry.tunnel_id);
            server.tracker.cancel_tunnel(&entry.tunnel_id);
            if let Some(port) = entry.public_port {
                server.ports.release(port);
            }
            server.data_hubs.lock().expect("data hub map poisoned").remove(&entry.tunnel_id);
            entry.drain_queue();
            let _ = server.storage.set_tunnel_status(entry.db_id, "closed").await;
        });
    }

    fn resolve_entry_for_host(&self, host: &str) -> Option<Arc<TunnelEntry>> {
        let host = host.split(':').next().unwrap_or(host);
        if let Some(entry) = self.registry.get_by_host(host) {
            return Some(entry);
        }
        let suffix = format!(".{}", self.domains.base_domain());
        let subdomain = host.strip_suffix(&suffix)?;
        self.registry.get_by_subdomain(subdomain)
    }
}

async fn control_ws_upgrade(ws: WebSocketUpgrade, State(server): State<Arc<TunnelServer>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_control_socket(server, socket))
}

async fn handle_control_socket(server: Arc<TunnelServer>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let init_frame = match tokio::time::timeout(Duration::from_secs(10), stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => ControlFrame::from_json_bytes(text.as_bytes()).ok(),
        _ => None,
    };

    let Some(ControlFrame::Init { local_url, token, subdomain, tunnel_id, protocol, .. }) = init_frame else {
        let _ = send_frame(&mut sink, &error_frame("invalid_init", "expected a valid init frame")).await;
        return;
    };

    let auth_ctx = match server.auth.authenticate(token.as_deref()) {
        Ok(ctx) => ctx,
        Err(message) => {
            let _ = send_frame(&mut sink, &error_frame("unauthorized", message)).await;
            return;
        }
    };

    let entry = match server
        .resolve_or_create_tunnel(auth_ctx.user_id, subdomain, tunnel_id, protocol, local_url)
        .await
    {
        Ok(entry) => entry,
        Err(message) => {
            let _ = send_frame(&mut sink, &error_frame("init_failed", &message)).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<ControlFrame>(128);
    entry.rebind(tx.clone());
    let _ = server.storage.set_tunnel_status(entry.db_id, "active").await;

    let public_url = match &entry.custom_domain {
        Some(domain) => format!("https://{domain}"),
        None => server.domains.public_url(&entry.subdomain),
    };
    let created = ControlFrame::TunnelCreated {
        tunnel_id: entry.tunnel_id.clone(),
        subdomain: entry.subdomain.clone(),
        public_url,
        status: "active".to_string(),
    };
    if send_frame(&mut sink, &created).await.is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if send_frame(&mut sink, &frame).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_interval = Duration::from_secs(server.config.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    let mut missed_heartbeats: u32 = 0;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                missed_heartbeats += 1;
                if missed_heartbeats > server.config.heartbeat_miss_limit {
                    tracing::info!(event = "tunnel_heartbeat_timeout", tunnel_id = %entry.tunnel_id);
                    break;
                }
                if tx.try_send(ControlFrame::Ping { timestamp: OffsetDateTime::now_utc().unix_timestamp() }).is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        missed_heartbeats = 0;
                        if let Ok(frame) = ControlFrame::from_json_bytes(text.as_bytes()) {
                            handle_client_frame(&server, &entry, frame);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    writer.abort();
    drop(tx);
    server.on_tunnel_disconnected(entry).await;
}

fn handle_client_frame(server: &Arc<TunnelServer>, entry: &Arc<TunnelEntry>, frame: ControlFrame) {
    match frame {
        ControlFrame::HttpResponse { request_id, status, headers, body } => {
            let bytes = body.0.len() as u64;
            server.tracker.complete(request_id, WaiterOutcome::Response { status, headers, body });
            entry.record_success(bytes);
        }
        ControlFrame::HttpError { request_id, error, message } => {
            server.tracker.complete(request_id, WaiterOutcome::UpstreamError { error, message });
            entry.record_error();
        }
        ControlFrame::Pong { .. } => {}
        ControlFrame::UpdateTunnel { local_url, .. } => {
            *entry.local_url.lock().expect("local url mutex poisoned") = local_url;
        }
        _ => {}
    }
}

fn error_frame(code: &str, message: &str) -> ControlFrame {
    ControlFrame::Error { code: code.to_string(), message: message.to_string() }
}

async fn send_frame(
    sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    frame: &ControlFrame,
) -> Result<(), axum::Error> {
    let text = String::from_utf8(frame.to_json_bytes()).expect("control frames are always valid utf8 json");
    sink.send(Message::Text(text.into())).await
}

async fn data_ws_upgrade(
    ws: WebSocketUpgrade,
    State(server): State<Arc<TunnelServer>>,
    Path(tunnel_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_data_socket(server, tunnel_id, socket))
}

async fn handle_data_socket(server: Arc<TunnelServer>, tunnel_id: String, socket: WebSocket) {
    let Some(hub) = server.data_hubs.lock().expect("data hub map poisoned").get(&tunnel_id).cloned() else {
        return;
    };

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(128);
    hub.set_outbound(tx);

    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Message::Binary(bytes) = message {
            if let Some((stream_id, payload)) = raw_forward::decode_frame(&bytes) {
                hub.dispatch_inbound(stream_id, payload.to_vec());
            }
        }
    }

    writer.abort();
    hub.clear_outbound();
}

async fn handle_public_request(
    State(server): State<Arc<TunnelServer>>,
    request: Request<Body>,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let Some(entry) = server.resolve_entry_for_host(&host) else {
        return (StatusCode::NOT_FOUND, "no tunnel bound to this host").into_response();
    };

    if entry.protocol != TunnelProtocolKind::Http {
        return (StatusCode::BAD_GATEWAY, "tunnel does not serve http").into_response();
    }

    let method = request.method().as_str().to_string();
    if !ALLOWED_METHODS.contains(&method.as_str()) {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let path = sanitize_path(request.uri().path());
    if path.len() > MAX_PATH_LEN {
        return (StatusCode::URI_TOO_LONG, "request path too long").into_response();
    }

    let mut headers = OrderedHeaders::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }
    if headers.byte_len() > MAX_HEADER_BLOCK_BYTES {
        return (StatusCode::BAD_REQUEST, "request headers too large").into_response();
    }

    let query = request.uri().query().map(|q| q.to_string());
    let body_bytes = match axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024).await {
        Ok(bytes) => bytes.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "failed to read request body").into_response(),
    };

    let logged_method = method.clone();
    let logged_path = path.clone();
    let logged_request_headers = headers_to_json(&headers);
    let logged_request_body = base64_encode(&body_bytes);

    let request_id = RequestId::new_random();
    let frame = ControlFrame::HttpRequest {
        request_id,
        method,
        path,
        query,
        headers,
        body: WireBody(body_bytes),
    };

    let timeout = Duration::from_secs(server.config.request_timeout_secs);
    let outcome_rx = server.tracker.register(request_id, entry.tunnel_id.clone(), timeout);

    if let Err(err) = entry.forward(frame) {
        server.tracker.deregister(request_id);
        return match err {
            ForwardError::NotConnected => (StatusCode::BAD_GATEWAY, "tunnel_not_connected").into_response(),
            ForwardError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "tunnel request queue full").into_response(),
        };
    }

    let started_at = std::time::Instant::now();
    let mut error_kind: Option<&'static str> = None;
    let mut logged_response_headers: Option<String> = None;
    let mut logged_response_body: Option<String> = None;
    let response = match outcome_rx.await {
        Ok(WaiterOutcome::Response { status, headers, body }) => {
            logged_response_headers = Some(headers_to_json(&headers));
            logged_response_body = Some(base64_encode(&body.0));
            let mut builder = Response::builder().status(status);
            for (name, value) in headers.iter() {
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(body.0))
                .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "bad upstream response").into_response())
        }
        Ok(WaiterOutcome::UpstreamError { error, message }) => {
            tracing::warn!(event = "tunnel_upstream_error", tunnel_id = %entry.tunnel_id, error, message);
            error_kind = Some("upstream_error");
            (StatusCode::BAD_GATEWAY, "upstream_error").into_response()
        }
        Ok(WaiterOutcome::Timeout) => {
            error_kind = Some("tunnel_timeout");
            (StatusCode::GATEWAY_TIMEOUT, "tunnel_timeout").into_response()
        }
        Ok(WaiterOutcome::TunnelClosed) => {
            error_kind = Some("tunnel_closed");
            (StatusCode::BAD_GATEWAY, "tunnel_closed").into_response()
        }
        Err(_) => {
            error_kind = Some("internal");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal").into_response()
        }
    };

    let latency_ms = started_at.elapsed().as_millis() as i64;
    let activity = TunnelActivity {
        requests: 1,
        bytes: 0,
        errors: i64::from(!response.status().is_success()),
        latency_ms_sample: Some(latency_ms),
    };

    let log_entry = uniroute_storage::NewRequestLogEntry {
        kind: "tunnel",
        trace_id: uuid::Uuid::new_v4().to_string(),
        user_id: Some(entry.user_id),
        api_key_id: None,
        tunnel_id: Some(entry.db_id),
        provider: None,
        model: None,
        method: Some(logged_method),
        path: Some(logged_path),
        status: Some(i32::from(response.status().as_u16())),
        prompt_tokens: None,
        completion_tokens: None,
        cost_usd: None,
        latency_ms: Some(latency_ms),
        error_kind: error_kind.map(str::to_string),
        request_headers: Some(logged_request_headers),
        request_body: Some(logged_request_body),
        response_headers: logged_response_headers,
        response_body: logged_response_body,
    };

    // Persist off the hot path (spec §4.1 step 7 "asynchronously"), mirroring
    // the fire-and-forget pattern `ChannelAccountingSink` uses for gateway
    // usage accounting.
    let db_id = entry.db_id;
    let storage = server.storage.clone();
    tokio::spawn(async move {
        if let Err(err) = storage.record_tunnel_activity(db_id, activity).await {
            tracing::warn!(event = "tunnel_activity_persist_failed", tunnel_db_id = db_id, error = %err);
        }
        if let Err(err) = storage.append_request_log(log_entry).await {
            tracing::warn!(event = "tunnel_request_log_persist_failed", tunnel_db_id = db_id, error = %err);
        }
    });

    response
}

fn headers_to_json(headers: &OrderedHeaders) -> String {
    let pairs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}
