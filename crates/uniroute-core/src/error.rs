//! `{status, body}` error shape shared by `Auth` and `GatewayFront`
//! middleware (spec §7), generalizing `gproxy_core::error::ProxyError` to
//! the full `ErrorKind` taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uniroute_common::ErrorKind;

#[derive(Debug)]
pub struct CoreError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = match kind {
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InvalidRequest | ErrorKind::UpstreamInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NoProviderAvailable | ErrorKind::NoPortAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::TunnelNotConnected => StatusCode::BAD_GATEWAY,
            ErrorKind::TunnelTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamTransient => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.kind.as_str(), "message": self.message })),
        )
            .into_response()
    }
}
