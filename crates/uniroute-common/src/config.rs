use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persisted back to
/// the DB, mirroring the teacher's `GlobalConfig`/`GlobalConfigPatch` split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash, never plaintext.
    pub admin_jwt_secret_hash: String,
    pub dsn: String,
    /// Outbound proxy for upstream provider egress.
    pub proxy: Option<String>,
    /// Process-wide AEAD key (hex) used to encrypt BYOK provider keys.
    pub secret_key_hex: String,
    pub default_routing_strategy: String,
    pub provider_call_timeout_secs: u64,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_day: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_jwt_secret_hash: Option<String>,
    pub dsn: Option<String>,
    pub proxy: Option<String>,
    pub secret_key_hex: Option<String>,
    pub default_routing_strategy: Option<String>,
    pub provider_call_timeout_secs: Option<u64>,
    pub rate_limit_per_minute: Option<u32>,
    pub rate_limit_per_day: Option<u32>,
}

macro_rules! overlay_field {
    ($self:ident, $other:ident, $field:ident) => {
        if $other.$field.is_some() {
            $self.$field = $other.$field;
        }
    };
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        overlay_field!(self, other, host);
        overlay_field!(self, other, port);
        overlay_field!(self, other, admin_jwt_secret_hash);
        overlay_field!(self, other, dsn);
        overlay_field!(self, other, proxy);
        overlay_field!(self, other, secret_key_hex);
        overlay_field!(self, other, default_routing_strategy);
        overlay_field!(self, other, provider_call_timeout_secs);
        overlay_field!(self, other, rate_limit_per_minute);
        overlay_field!(self, other, rate_limit_per_day);
    }

    pub fn into_config(self) -> Result<GatewayConfig, ConfigError> {
        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            admin_jwt_secret_hash: self
                .admin_jwt_secret_hash
                .ok_or(ConfigError::MissingField("admin_jwt_secret_hash"))?,
            dsn: self.dsn.ok_or(ConfigError::MissingField("dsn"))?,
            proxy: self.proxy,
            secret_key_hex: self
                .secret_key_hex
                .ok_or(ConfigError::MissingField("secret_key_hex"))?,
            default_routing_strategy: self
                .default_routing_strategy
                .unwrap_or_else(|| "model".to_string()),
            provider_call_timeout_secs: self.provider_call_timeout_secs.unwrap_or(30),
            rate_limit_per_minute: self.rate_limit_per_minute.unwrap_or(60),
            rate_limit_per_day: self.rate_limit_per_day.unwrap_or(10_000),
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_jwt_secret_hash: Some(value.admin_jwt_secret_hash),
            dsn: Some(value.dsn),
            proxy: value.proxy,
            secret_key_hex: Some(value.secret_key_hex),
            default_routing_strategy: Some(value.default_routing_strategy),
            provider_call_timeout_secs: Some(value.provider_call_timeout_secs),
            rate_limit_per_minute: Some(value.rate_limit_per_minute),
            rate_limit_per_day: Some(value.rate_limit_per_day),
        }
    }
}

/// Tunnel-server-side configuration (separate from the gateway; the two
/// processes can be deployed independently even though `apps/uniroute-server`
/// wires both into one binary by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub public_host: String,
    pub public_port: u16,
    pub control_host: String,
    pub control_port: u16,
    pub base_domain: String,
    pub auth_required: bool,
    pub grace_period_secs: u64,
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub disconnect_queue_capacity: usize,
    pub dynamic_port_range: (u16, u16),
    pub heartbeat_interval_secs: u64,
    pub heartbeat_miss_limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunnelConfigPatch {
    pub public_host: Option<String>,
    pub public_port: Option<u16>,
    pub control_host: Option<String>,
    pub control_port: Option<u16>,
    pub base_domain: Option<String>,
    pub auth_required: Option<bool>,
    pub grace_period_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub disconnect_queue_capacity: Option<usize>,
    pub dynamic_port_range: Option<(u16, u16)>,
    pub heartbeat_interval_secs: Option<u64>,
    pub heartbeat_miss_limit: Option<u32>,
}

impl TunnelConfigPatch {
    pub fn overlay(&mut self, other: TunnelConfigPatch) {
        overlay_field!(self, other, public_host);
        overlay_field!(self, other, public_port);
        overlay_field!(self, other, control_host);
        overlay_field!(self, other, control_port);
        overlay_field!(self, other, base_domain);
        overlay_field!(self, other, auth_required);
        overlay_field!(self, other, grace_period_secs);
        overlay_field!(self, other, idle_timeout_secs);
        overlay_field!(self, other, request_timeout_secs);
        overlay_field!(self, other, disconnect_queue_capacity);
        overlay_field!(self, other, dynamic_port_range);
        overlay_field!(self, other, heartbeat_interval_secs);
        overlay_field!(self, other, heartbeat_miss_limit);
    }

    pub fn into_config(self) -> TunnelConfig {
        TunnelConfig {
            public_host: self.public_host.unwrap_or_else(|| "0.0.0.0".to_string()),
            public_port: self.public_port.unwrap_or(8000),
            control_host: self.control_host.unwrap_or_else(|| "0.0.0.0".to_string()),
            control_port: self.control_port.unwrap_or(8001),
            base_domain: self
                .base_domain
                .unwrap_or_else(|| "tunnel.example.com".to_string()),
            auth_required: self.auth_required.unwrap_or(false),
            // Open question in spec.md §9: the grace-period TTL varies
            // (1 min vs 5 min) across source docs. We choose 5 minutes,
            // the upper (safer, less likely to race a slow client) bound.
            grace_period_secs: self.grace_period_secs.unwrap_or(300),
            idle_timeout_secs: self.idle_timeout_secs.unwrap_or(3600),
            request_timeout_secs: self.request_timeout_secs.unwrap_or(60),
            disconnect_queue_capacity: self.disconnect_queue_capacity.unwrap_or(100),
            dynamic_port_range: self.dynamic_port_range.unwrap_or((20000, 29999)),
            heartbeat_interval_secs: self.heartbeat_interval_secs.unwrap_or(30),
            heartbeat_miss_limit: self.heartbeat_miss_limit.unwrap_or(3),
        }
    }
}

impl From<TunnelConfig> for TunnelConfigPatch {
    fn from(value: TunnelConfig) -> Self {
        Self {
            public_host: Some(value.public_host),
            public_port: Some(value.public_port),
            control_host: Some(value.control_host),
            control_port: Some(value.control_port),
            base_domain: Some(value.base_domain),
            auth_required: Some(value.auth_required),
            grace_period_secs: Some(value.grace_period_secs),
            idle_timeout_secs: Some(value.idle_timeout_secs),
            request_timeout_secs: Some(value.request_timeout_secs),
            disconnect_queue_capacity: Some(value.disconnect_queue_capacity),
            dynamic_port_range: Some(value.dynamic_port_range),
            heartbeat_interval_secs: Some(value.heartbeat_interval_secs),
            heartbeat_miss_limit: Some(value.heartbeat_miss_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_overlay_prefers_later_values() {
        let mut base = GatewayConfigPatch {
            host: Some("a".to_string()),
            port: Some(1),
            ..Default::default()
        };
        base.overlay(GatewayConfigPatch {
            port: Some(2),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("a"));
        assert_eq!(base.port, Some(2));
    }

    #[test]
    fn tunnel_config_defaults_grace_period_to_five_minutes() {
        let cfg = TunnelConfigPatch::default().into_config();
        assert_eq!(cfg.grace_period_secs, 300);
    }
}
