//! The tunnel client CLI (spec §4.4 "TunnelClient"): connects one local
//! service to a `uniroute-tunnel-server` and keeps it exposed for the life
//! of the process, resuming its prior subdomain across restarts via a
//! persisted state file. Mirrors `apps/gproxy/src/main.rs`'s
//! bootstrap-then-serve shape, generalized to a single long-lived client
//! connection instead of a listening server.

use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use uniroute_protocol::tunnel::TunnelProtocolKind;
use uniroute_tunnel_client::{ClientConfig, TunnelClient, DEFAULT_LOCAL_TIMEOUT};

#[derive(Debug, Clone, Parser)]
#[command(name = "uniroute-tunnel", about = "Expose a local service through a UniRoute tunnel")]
struct Args {
    /// Control-plane WebSocket URL of the tunnel server, e.g. `wss://tunnel.example.com/tunnel`.
    #[arg(long, env = "UNIROUTE_TUNNEL_CONTROL_URL")]
    control_url: String,

    /// Local service URL to forward inbound requests to, e.g. `http://127.0.0.1:3000`.
    #[arg(long, env = "UNIROUTE_TUNNEL_LOCAL_URL")]
    local_url: String,

    /// Tunnel auth token, required only when the server enforces `auth_required`.
    #[arg(long, env = "UNIROUTE_TUNNEL_TOKEN")]
    token: Option<String>,

    /// Requested subdomain label; the server may reassign it if taken.
    #[arg(long, env = "UNIROUTE_TUNNEL_SUBDOMAIN")]
    subdomain: Option<String>,

    /// One of: http, tcp, tls, udp.
    #[arg(long, env = "UNIROUTE_TUNNEL_PROTOCOL", default_value = "http")]
    protocol: String,

    /// Where to persist the assigned tunnel identity for resume-on-reconnect.
    #[arg(long, env = "UNIROUTE_TUNNEL_STATE_PATH", default_value = ".uniroute-tunnel-state.json")]
    state_path: std::path::PathBuf,

    /// Timeout for each local forwarded request, in seconds.
    #[arg(long, env = "UNIROUTE_TUNNEL_LOCAL_TIMEOUT_SECS")]
    local_timeout_secs: Option<u64>,
}

fn parse_protocol(s: &str) -> anyhow::Result<TunnelProtocolKind> {
    match s.to_ascii_lowercase().as_str() {
        "http" => Ok(TunnelProtocolKind::Http),
        "tcp" => Ok(TunnelProtocolKind::Tcp),
        "tls" => Ok(TunnelProtocolKind::Tls),
        "udp" => Ok(TunnelProtocolKind::Udp),
        other => bail!("unknown protocol '{other}', expected one of http, tcp, tls, udp"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let protocol = parse_protocol(&args.protocol).context("parse --protocol")?;

    let config = ClientConfig {
        control_url: args.control_url,
        local_url: args.local_url,
        token: args.token,
        requested_subdomain: args.subdomain,
        protocol,
        state_path: args.state_path,
        local_timeout: args.local_timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_LOCAL_TIMEOUT),
    };

    TunnelClient::new(config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_protocol_accepts_known_names_case_insensitively() {
        assert_eq!(parse_protocol("http").unwrap(), TunnelProtocolKind::Http);
        assert_eq!(parse_protocol("TCP").unwrap(), TunnelProtocolKind::Tcp);
        assert_eq!(parse_protocol("Tls").unwrap(), TunnelProtocolKind::Tls);
        assert_eq!(parse_protocol("udp").unwrap(), TunnelProtocolKind::Udp);
    }

    #[test]
    fn parse_protocol_rejects_unknown_names() {
        assert!(parse_protocol("quic").is_err());
    }
}
