//! Shared outbound HTTP client cache, keyed by outbound proxy so each
//! distinct proxy configuration gets its own pooled `wreq::Client` instead
//! of building one per request.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use uniroute_provider_core::ProviderError;

static CLIENT_CACHE: OnceLock<Mutex<HashMap<Option<String>, wreq::Client>>> = OnceLock::new();

pub(crate) fn client_for_proxy(proxy: Option<&str>) -> Result<wreq::Client, ProviderError> {
    let key = normalize_proxy(proxy);
    let cache = CLIENT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = cache
        .lock()
        .map_err(|_| ProviderError::Transient("http client cache lock poisoned".to_string()))?;

    if let Some(client) = guard.get(&key) {
        return Ok(client.clone());
    }

    let client = build_client(key.as_deref())?;
    guard.insert(key, client.clone());
    Ok(client)
}

fn build_client(proxy: Option<&str>) -> Result<wreq::Client, ProviderError> {
    let mut builder = wreq::Client::builder().emulation(wreq_util::Emulation::Chrome136);
    if let Some(proxy_url) = proxy {
        let proxy = wreq::Proxy::all(proxy_url)
            .map_err(|err| ProviderError::Transient(format!("invalid proxy: {err}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|err| ProviderError::Transient(format!("client build failed: {err}")))
}

fn normalize_proxy(value: Option<&str>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}
