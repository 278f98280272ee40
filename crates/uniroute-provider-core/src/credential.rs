//! BYOK credential resolution (spec §4.2, §4.3): each call resolves a
//! provider API key from, in order, the caller's own stored key, the
//! process-wide default key, or no key at all.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Lock-free snapshot of decrypted provider keys. Updated wholesale
/// (swapped, never mutated in place) whenever storage reloads credentials,
/// mirroring the `ArcSwap`-snapshot pattern used for `AppState`.
#[derive(Default)]
pub struct ProviderKeyPool {
    user_keys: ArcSwap<HashMap<(i64, String), String>>,
    process_keys: ArcSwap<HashMap<String, String>>,
}

impl ProviderKeyPool {
    pub fn new() -> Self {
        Self {
            user_keys: ArcSwap::from_pointee(HashMap::new()),
            process_keys: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Resolves the key to present to `provider` for `user_id`: the user's
    /// own BYOK key if one is stored, else the process-wide fallback, else
    /// `None` (the adapter is called without credentials, which only
    /// succeeds against providers that don't require one, e.g. local).
    pub fn resolve(&self, user_id: Option<i64>, provider: &str) -> Option<String> {
        if let Some(uid) = user_id {
            let user_keys = self.user_keys.load();
            if let Some(key) = user_keys.get(&(uid, provider.to_string())) {
                return Some(key.clone());
            }
        }
        self.process_keys.load().get(provider).cloned()
    }

    pub fn replace_user_keys(&self, keys: HashMap<(i64, String), String>) {
        self.user_keys.store(Arc::new(keys));
    }

    pub fn replace_process_keys(&self, keys: HashMap<String, String>) {
        self.process_keys.store(Arc::new(keys));
    }

    pub fn set_user_key(&self, user_id: i64, provider: &str, key: String) {
        let mut next = (**self.user_keys.load()).clone();
        next.insert((user_id, provider.to_string()), key);
        self.user_keys.store(Arc::new(next));
    }

    pub fn remove_user_key(&self, user_id: i64, provider: &str) {
        let mut next = (**self.user_keys.load()).clone();
        next.remove(&(user_id, provider.to_string()));
        self.user_keys.store(Arc::new(next));
    }

    pub fn set_process_key(&self, provider: &str, key: String) {
        let mut next = (**self.process_keys.load()).clone();
        next.insert(provider.to_string(), key);
        self.process_keys.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_user_key_over_process_key() {
        let pool = ProviderKeyPool::new();
        pool.set_process_key("openai", "process-key".to_string());
        pool.set_user_key(1, "openai", "user-key".to_string());
        assert_eq!(pool.resolve(Some(1), "openai"), Some("user-key".to_string()));
        assert_eq!(pool.resolve(Some(2), "openai"), Some("process-key".to_string()));
    }

    #[test]
    fn resolve_with_no_user_falls_back_to_process_key() {
        let pool = ProviderKeyPool::new();
        pool.set_process_key("anthropic", "proc".to_string());
        assert_eq!(pool.resolve(None, "anthropic"), Some("proc".to_string()));
    }

    #[test]
    fn resolve_returns_none_when_no_key_configured() {
        let pool = ProviderKeyPool::new();
        assert_eq!(pool.resolve(Some(1), "gemini"), None);
    }

    #[test]
    fn remove_user_key_falls_back_to_process_key() {
        let pool = ProviderKeyPool::new();
        pool.set_process_key("openai", "proc".to_string());
        pool.set_user_key(1, "openai", "user".to_string());
        pool.remove_user_key(1, "openai");
        assert_eq!(pool.resolve(Some(1), "openai"), Some("proc".to_string()));
    }
}
