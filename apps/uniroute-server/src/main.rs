//! Process entry point: boots the gateway (`uniroute_core::bootstrap`), the
//! tunnel server (`uniroute_tunnel_server::TunnelServer`), and the admin API
//! (`uniroute_admin::admin_router`) as one binary, each on its own listener.
//! Mirrors `gproxy`'s `main.rs` shape — bootstrap, assemble routers, serve —
//! generalized from the teacher's single proxy+admin listener to three.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use uniroute_common::TunnelConfigPatch;

#[derive(Debug, Clone, Parser)]
#[command(name = "uniroute-tunnel-server", about = "UniRoute tunnel control/public listener config")]
struct TunnelCliArgs {
    #[arg(long, env = "UNIROUTE_TUNNEL_PUBLIC_HOST")]
    public_host: Option<String>,
    #[arg(long, env = "UNIROUTE_TUNNEL_PUBLIC_PORT")]
    public_port: Option<u16>,
    #[arg(long, env = "UNIROUTE_TUNNEL_CONTROL_HOST")]
    control_host: Option<String>,
    #[arg(long, env = "UNIROUTE_TUNNEL_CONTROL_PORT")]
    control_port: Option<u16>,
    #[arg(long, env = "UNIROUTE_TUNNEL_BASE_DOMAIN")]
    base_domain: Option<String>,
    #[arg(long, env = "UNIROUTE_TUNNEL_AUTH_REQUIRED")]
    auth_required: Option<bool>,
    #[arg(long, env = "UNIROUTE_TUNNEL_GRACE_PERIOD_SECS")]
    grace_period_secs: Option<u64>,
    #[arg(long, env = "UNIROUTE_TUNNEL_IDLE_TIMEOUT_SECS")]
    idle_timeout_secs: Option<u64>,
    #[arg(long, env = "UNIROUTE_TUNNEL_REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,
    #[arg(long, env = "UNIROUTE_TUNNEL_ADMIN_HOST")]
    admin_host: Option<String>,
    #[arg(long, env = "UNIROUTE_TUNNEL_ADMIN_PORT")]
    admin_port: Option<u16>,
}

impl TunnelCliArgs {
    fn into_patch(self) -> TunnelConfigPatch {
        TunnelConfigPatch {
            public_host: self.public_host,
            public_port: self.public_port,
            control_host: self.control_host,
            control_port: self.control_port,
            base_domain: self.base_domain,
            auth_required: self.auth_required,
            grace_period_secs: self.grace_period_secs,
            idle_timeout_secs: self.idle_timeout_secs,
            request_timeout_secs: self.request_timeout_secs,
            disconnect_queue_capacity: None,
            dynamic_port_range: None,
            heartbeat_interval_secs: None,
            heartbeat_miss_limit: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let tunnel_args = TunnelCliArgs::parse();
    let admin_host = tunnel_args.admin_host.clone().unwrap_or_else(|| "0.0.0.0".to_string());
    let admin_port = tunnel_args.admin_port.unwrap_or(8090);
    let tunnel_config = tunnel_args.into_patch().into_config();

    let boot = uniroute_core::bootstrap::bootstrap_from_env().await.context("bootstrap gateway")?;
    let global = boot.state.global.load();
    let gateway_bind = format!("{}:{}", global.host, global.port);
    drop(global);

    let tunnel_server = uniroute_tunnel_server::TunnelServer::new(
        tunnel_config,
        boot.state.storage.clone(),
        boot.state.snapshot.clone(),
    );

    let gateway_app = uniroute_core::gateway::build_gateway_router(boot.state.clone());
    let admin_app = uniroute_admin::admin_router(boot.state.clone(), tunnel_server.clone());

    let gateway_listener = tokio::net::TcpListener::bind(&gateway_bind).await.context("bind gateway listener")?;
    let admin_bind = format!("{admin_host}:{admin_port}");
    let admin_listener = tokio::net::TcpListener::bind(&admin_bind).await.context("bind admin listener")?;

    tracing::info!(event = "listening", gateway = %gateway_bind, admin = %admin_bind);

    let gateway_task = tokio::spawn(async move { axum::serve(gateway_listener, gateway_app).await });
    let admin_task = tokio::spawn(async move { axum::serve(admin_listener, admin_app).await });
    let tunnel_task = tokio::spawn(async move { Arc::clone(&tunnel_server).serve().await });

    tokio::select! {
        res = gateway_task => res.context("gateway task panicked")?.context("gateway server error")?,
        res = admin_task => res.context("admin task panicked")?.context("admin server error")?,
        res = tunnel_task => res.context("tunnel task panicked")?.context("tunnel server error")?,
    }

    Ok(())
}
