//! `/api/tunnels` (spec §6 "Public tunnel endpoints"): live tunnel listing
//! and stats straight from the in-process `TunnelRegistry`, plus captured
//! request inspection and replay backed by the persisted request log.
//! Grounded on `uniroute_tunnel_server::server`'s own request/response
//! logging (`headers_to_json`/`base64_encode`) and forwarding
//! (`handle_public_request`) for the wire shapes and replay mechanics.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uniroute_protocol::tunnel::{ControlFrame, OrderedHeaders, RequestId, WireBody};
use uniroute_storage::{RequestLogFilter, Storage};
use uniroute_tunnel_protocol::WaiterOutcome;
use uniroute_tunnel_server::{ForwardError, TunnelStatus};

use crate::state::AdminState;

#[derive(Serialize)]
struct TunnelSummary {
    tunnel_id: String,
    db_id: i64,
    user_id: i64,
    subdomain: String,
    custom_domain: Option<String>,
    protocol: &'static str,
    public_port: Option<u16>,
    local_url: String,
    status: &'static str,
}

pub async fn list_tunnels(State(state): State<AdminState>) -> Json<Vec<TunnelSummary>> {
    let entries = state.tunnel.registry().all();
    Json(
        entries
            .iter()
            .map(|entry| TunnelSummary {
                tunnel_id: entry.tunnel_id.clone(),
                db_id: entry.db_id,
                user_id: entry.user_id,
                subdomain: entry.subdomain.clone(),
                custom_domain: entry.custom_domain.clone(),
                protocol: protocol_name(entry.protocol),
                public_port: entry.public_port,
                local_url: entry.local_url.lock().expect("tunnel local url mutex poisoned").clone(),
                status: status_name(*entry.status.lock().expect("tunnel status mutex poisoned")),
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct TunnelStatsResponse {
    tunnel_id: String,
    requests: u64,
    errors: u64,
    bytes: u64,
    avg_latency_ms: Option<i64>,
}

pub async fn tunnel_stats(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    let Some(entry) = state.tunnel.registry().get_by_id(&id) else {
        return not_found("unknown tunnel");
    };
    let counters = *entry.counters.lock().expect("tunnel counters mutex poisoned");

    let recent = state
        .app
        .storage
        .list_request_log(
            RequestLogFilter { tunnel_id: Some(entry.db_id), method: None, path: None },
            100,
            0,
        )
        .await;
    let avg_latency_ms = match recent {
        Ok(rows) if !rows.is_empty() => {
            let samples: Vec<i64> = rows.iter().filter_map(|r| r.latency_ms).collect();
            if samples.is_empty() {
                None
            } else {
                Some(samples.iter().sum::<i64>() / samples.len() as i64)
            }
        }
        _ => None,
    };

    Json(TunnelStatsResponse {
        tunnel_id: entry.tunnel_id.clone(),
        requests: counters.requests,
        errors: counters.errors,
        bytes: counters.bytes,
        avg_latency_ms,
    })
    .into_response()
}

#[derive(Deserialize)]
pub struct RequestLogQuery {
    method: Option<String>,
    path: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Serialize)]
struct RequestLogSummary {
    id: i64,
    at: String,
    method: Option<String>,
    path: Option<String>,
    status: Option<i32>,
    latency_ms: Option<i64>,
    error_kind: Option<String>,
}

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

pub async fn list_requests(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Query(query): Query<RequestLogQuery>,
) -> Response {
    let Some(entry) = state.tunnel.registry().get_by_id(&id) else {
        return not_found("unknown tunnel");
    };

    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = query.offset.unwrap_or(0).max(0);
    let rows = state
        .app
        .storage
        .list_request_log(
            RequestLogFilter { tunnel_id: Some(entry.db_id), method: query.method, path: query.path },
            limit,
            offset,
        )
        .await;

    match rows {
        Ok(rows) => Json(
            rows.into_iter()
                .map(|r| RequestLogSummary {
                    id: r.id,
                    at: r.at.format(&time::format_description::well_known::Rfc3339).unwrap_or_default(),
                    method: r.method,
                    path: r.path,
                    status: r.status,
                    latency_ms: r.latency_ms,
                    error_kind: r.error_kind,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Serialize)]
struct RequestLogDetail {
    id: i64,
    at: String,
    method: Option<String>,
    path: Option<String>,
    status: Option<i32>,
    latency_ms: Option<i64>,
    error_kind: Option<String>,
    request_headers: Vec<(String, String)>,
    request_body_base64: Option<String>,
    response_headers: Vec<(String, String)>,
    response_body_base64: Option<String>,
}

pub async fn get_request(State(state): State<AdminState>, Path((id, rid)): Path<(String, i64)>) -> Response {
    let Some(entry) = state.tunnel.registry().get_by_id(&id) else {
        return not_found("unknown tunnel");
    };

    let row = match state.app.storage.get_request_log(rid).await {
        Ok(Some(row)) if row.tunnel_id == Some(entry.db_id) => row,
        Ok(_) => return not_found("unknown request"),
        Err(err) => return internal_error(err),
    };

    Json(RequestLogDetail {
        id: row.id,
        at: row.at.format(&time::format_description::well_known::Rfc3339).unwrap_or_default(),
        method: row.method,
        path: row.path,
        status: row.status,
        latency_ms: row.latency_ms,
        error_kind: row.error_kind,
        request_headers: decode_header_json(row.request_headers.as_deref()),
        request_body_base64: row.request_body,
        response_headers: decode_header_json(row.response_headers.as_deref()),
        response_body_base64: row.response_body,
    })
    .into_response()
}

#[derive(Serialize)]
struct ReplayResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body_base64: String,
}

/// Re-issues a captured request through the tunnel's live control
/// connection, reusing `TunnelEntry::forward`/`RequestTracker` exactly as
/// `handle_public_request` does for a fresh inbound request.
// Looks up by tunnel id with no per-principal ownership check, same as the
// rest of this admin surface (`DEFAULT_USER_ID`-scoped, single-tenant). If
// the admin API ever grows multi-user scope, this needs the same ownership
// check `TunnelServer::try_resume` applies to the tunnel-hijack path.
pub async fn replay_request(State(state): State<AdminState>, Path((id, rid)): Path<(String, i64)>) -> Response {
    let Some(entry) = state.tunnel.registry().get_by_id(&id) else {
        return not_found("unknown tunnel");
    };

    let row = match state.app.storage.get_request_log(rid).await {
        Ok(Some(row)) if row.tunnel_id == Some(entry.db_id) => row,
        Ok(_) => return not_found("unknown request"),
        Err(err) => return internal_error(err),
    };

    let (Some(method), Some(path)) = (row.method.clone(), row.path.clone()) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "invalid_request", "message": "captured request has no method/path" })),
        )
            .into_response();
    };

    let headers = decode_header_json(row.request_headers.as_deref())
        .into_iter()
        .fold(OrderedHeaders::new(), |mut acc, (k, v)| {
            acc.insert(k, v);
            acc
        });
    let body = row
        .request_body
        .as_deref()
        .and_then(base64_decode)
        .unwrap_or_default();

    let request_id = RequestId::new_random();
    let frame = ControlFrame::HttpRequest { request_id, method, path, query: None, headers, body: WireBody(body) };

    let timeout = Duration::from_secs(state.tunnel.config().request_timeout_secs);
    let outcome_rx = state.tunnel.tracker().register(request_id, entry.tunnel_id.clone(), timeout);

    if let Err(err) = entry.forward(frame) {
        state.tunnel.tracker().deregister(request_id);
        return match err {
            ForwardError::NotConnected => (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": "tunnel_not_connected", "message": "tunnel has no live control connection" })),
            )
                .into_response(),
            ForwardError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "internal", "message": "tunnel request queue full" })),
            )
                .into_response(),
        };
    }

    match outcome_rx.await {
        Ok(WaiterOutcome::Response { status, headers, body }) => Json(ReplayResponse {
            status,
            headers: headers.iter().cloned().collect(),
            body_base64: base64_encode(&body.0),
        })
        .into_response(),
        Ok(WaiterOutcome::UpstreamError { error, message }) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": error, "message": message })),
        )
            .into_response(),
        Ok(WaiterOutcome::Timeout) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(serde_json::json!({ "error": "tunnel_timeout", "message": "replay timed out" })),
        )
            .into_response(),
        Ok(WaiterOutcome::TunnelClosed) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": "tunnel_not_connected", "message": "tunnel closed during replay" })),
        )
            .into_response(),
        Err(_) => internal_error_message("replay waiter dropped"),
    }
}

fn protocol_name(protocol: uniroute_protocol::tunnel::TunnelProtocolKind) -> &'static str {
    use uniroute_protocol::tunnel::TunnelProtocolKind;
    match protocol {
        TunnelProtocolKind::Http => "http",
        TunnelProtocolKind::Tcp => "tcp",
        TunnelProtocolKind::Tls => "tls",
        TunnelProtocolKind::Udp => "udp",
    }
}

fn status_name(status: TunnelStatus) -> &'static str {
    match status {
        TunnelStatus::Active => "active",
        TunnelStatus::Disconnected => "disconnected",
        TunnelStatus::Paused => "paused",
        TunnelStatus::Closed => "closed",
    }
}

fn decode_header_json(raw: Option<&str>) -> Vec<(String, String)> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.decode(s).ok()
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not_found", "message": message }))).into_response()
}

fn internal_error(err: uniroute_storage::StorageError) -> Response {
    internal_error_message(&err.to_string())
}

fn internal_error_message(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal", "message": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniroute_protocol::tunnel::TunnelProtocolKind;

    #[test]
    fn protocol_name_covers_every_variant() {
        assert_eq!(protocol_name(TunnelProtocolKind::Http), "http");
        assert_eq!(protocol_name(TunnelProtocolKind::Tcp), "tcp");
        assert_eq!(protocol_name(TunnelProtocolKind::Tls), "tls");
        assert_eq!(protocol_name(TunnelProtocolKind::Udp), "udp");
    }

    #[test]
    fn status_name_covers_every_variant() {
        assert_eq!(status_name(TunnelStatus::Active), "active");
        assert_eq!(status_name(TunnelStatus::Disconnected), "disconnected");
        assert_eq!(status_name(TunnelStatus::Paused), "paused");
        assert_eq!(status_name(TunnelStatus::Closed), "closed");
    }

    #[test]
    fn decode_header_json_round_trips() {
        let raw = serde_json::to_string(&vec![("content-type".to_string(), "text/plain".to_string())]).unwrap();
        let decoded = decode_header_json(Some(&raw));
        assert_eq!(decoded, vec![("content-type".to_string(), "text/plain".to_string())]);
    }

    #[test]
    fn decode_header_json_defaults_on_missing_or_invalid() {
        assert!(decode_header_json(None).is_empty());
        assert!(decode_header_json(Some("not json")).is_empty());
    }

    #[test]
    fn base64_round_trips_arbitrary_bytes() {
        let bytes = b"hello tunnel replay".to_vec();
        let encoded = base64_encode(&bytes);
        assert_eq!(base64_decode(&encoded), Some(bytes));
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert_eq!(base64_decode("not valid base64!!"), None);
    }
}
