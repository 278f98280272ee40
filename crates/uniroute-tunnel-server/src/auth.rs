//! Tunnel-token authentication (spec §4.4 "Init handshake", §4.7). The
//! client presents its token in `ControlFrame::Init.token`; verification
//! mirrors `uniroute_core::auth::ApiKeyAuth` (SHA-256 lookup hash, bcrypt
//! verification against an in-memory snapshot) but against
//! `StorageSnapshot::tunnel_tokens` instead of API keys.

use std::sync::Arc;

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uniroute_storage::StorageSnapshot;

#[derive(Debug, Clone, Copy)]
pub struct TunnelAuthContext {
    pub user_id: i64,
    pub tunnel_token_id: i64,
}

pub struct TunnelTokenAuth {
    snapshot: Arc<ArcSwap<StorageSnapshot>>,
    required: bool,
}

impl TunnelTokenAuth {
    pub fn new(snapshot: Arc<ArcSwap<StorageSnapshot>>, required: bool) -> Self {
        Self { snapshot, required }
    }

    /// `None` token is only accepted when auth isn't required (spec
    /// `TunnelConfig::auth_required`), in which case requests are attributed
    /// to the bootstrap default user.
    pub fn authenticate(&self, token: Option<&str>) -> Result<TunnelAuthContext, &'static str> {
        let Some(token) = token else {
            if self.required {
                return Err("tunnel token required");
            }
            return Ok(TunnelAuthContext { user_id: 0, tunnel_token_id: 0 });
        };

        let lookup_hash = sha256_hex(token);
        let snapshot = self.snapshot.load();
        let row = snapshot
            .tunnel_tokens
            .iter()
            .find(|row| row.lookup_hash == lookup_hash)
            .ok_or("invalid tunnel token")?;

        if !row.is_active {
            return Err("tunnel token revoked");
        }
        if let Some(expires_at) = row.expires_at {
            if expires_at <= OffsetDateTime::now_utc() {
                return Err("tunnel token expired");
            }
        }
        if !bcrypt::verify(token, &row.verification_hash).unwrap_or(false) {
            return Err("invalid tunnel token");
        }

        Ok(TunnelAuthContext { user_id: row.user_id, tunnel_token_id: row.id })
    }
}

fn sha256_hex(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_swap::ArcSwap;
    use uniroute_storage::TunnelTokenRow;

    fn snapshot_with_token(raw: &str) -> Arc<ArcSwap<StorageSnapshot>> {
        let verification_hash = bcrypt::hash(raw, 4).unwrap();
        let row = TunnelTokenRow {
            id: 1,
            user_id: 7,
            lookup_hash: sha256_hex(raw),
            verification_hash,
            expires_at: None,
            is_active: true,
        };
        Arc::new(ArcSwap::new(Arc::new(StorageSnapshot {
            global_config: None,
            users: vec![],
            api_keys: vec![],
            provider_keys: vec![],
            tunnels: vec![],
            domains: vec![],
            tunnel_tokens: vec![row],
        })))
    }

    #[test]
    fn valid_token_authenticates() {
        let auth = TunnelTokenAuth::new(snapshot_with_token("tk_secret"), true);
        let ctx = auth.authenticate(Some("tk_secret")).unwrap();
        assert_eq!(ctx.user_id, 7);
    }

    #[test]
    fn wrong_token_is_rejected() {
        let auth = TunnelTokenAuth::new(snapshot_with_token("tk_secret"), true);
        assert!(auth.authenticate(Some("wrong")).is_err());
    }

    #[test]
    fn missing_token_allowed_when_not_required() {
        let auth = TunnelTokenAuth::new(snapshot_with_token("tk_secret"), false);
        assert!(auth.authenticate(None).is_ok());
    }

    #[test]
    fn missing_token_rejected_when_required() {
        let auth = TunnelTokenAuth::new(snapshot_with_token("tk_secret"), true);
        assert!(auth.authenticate(None).is_err());
    }
}
