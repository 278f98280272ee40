pub mod api_keys;
pub mod domains;
pub mod global_config;
pub mod provider_keys;
pub mod request_log;
pub mod tunnel_tokens;
pub mod tunnels;
pub mod users;

pub use api_keys::Entity as ApiKeys;
pub use domains::Entity as Domains;
pub use global_config::Entity as GlobalConfig;
pub use provider_keys::Entity as ProviderKeys;
pub use request_log::Entity as RequestLog;
pub use tunnel_tokens::Entity as TunnelTokens;
pub use tunnels::Entity as Tunnels;
pub use users::Entity as Users;
