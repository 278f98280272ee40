pub mod config;
pub mod error;
pub mod principal;
pub mod secret;
pub mod security_headers;

pub use config::{GatewayConfig, GatewayConfigPatch, TunnelConfig, TunnelConfigPatch};
pub use error::ErrorKind;
pub use principal::Principal;
pub use secret::{SecretBox, SecretCipher};
pub use security_headers::SecurityHeadersLayer;
