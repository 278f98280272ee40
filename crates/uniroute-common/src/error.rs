use serde::Serialize;

/// The error taxonomy from the design spec. This is kinds, not concrete
/// error types: every crate-level error (auth, gateway, tunnel) carries one
/// of these plus a status code and a generic public message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    RateLimited,
    InvalidRequest,
    NotFound,
    TunnelNotConnected,
    TunnelTimeout,
    UpstreamTransient,
    UpstreamInvalid,
    NoProviderAvailable,
    NoPortAvailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TunnelNotConnected => "tunnel_not_connected",
            ErrorKind::TunnelTimeout => "tunnel_timeout",
            ErrorKind::UpstreamTransient => "upstream_transient",
            ErrorKind::UpstreamInvalid => "upstream_invalid",
            ErrorKind::NoProviderAvailable => "no_provider_available",
            ErrorKind::NoPortAvailable => "no_port_available",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether failover/caller-side retry is ever appropriate for this kind.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::UpstreamTransient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
