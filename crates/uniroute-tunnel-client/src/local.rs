//! Issues a decoded `http_request` frame against the declared local
//! upstream and translates the reply back into wire frame fields. Mirrors
//! `uniroute_provider_impl::http_client`'s single-client-builder idiom, but
//! the client here always targets `local_url` rather than a chosen proxy.

use std::time::Duration;

use uniroute_protocol::tunnel::{OrderedHeaders, WireBody};

pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LocalForwarder {
    client: wreq::Client,
    local_url: String,
    timeout: Duration,
}

pub struct LocalResponse {
    pub status: u16,
    pub headers: OrderedHeaders,
    pub body: WireBody,
}

impl LocalForwarder {
    pub fn new(local_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = wreq::Client::builder().build()?;
        Ok(Self { client, local_url: local_url.into(), timeout })
    }

    pub fn set_local_url(&mut self, local_url: String) {
        self.local_url = local_url;
    }

    pub async fn forward(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: &OrderedHeaders,
        body: &WireBody,
    ) -> Result<LocalResponse, String> {
        let mut url = format!("{}{}", self.local_url.trim_end_matches('/'), path);
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }

        let method = method
            .parse::<wreq::Method>()
            .map_err(|err| format!("invalid method: {err}"))?;

        let mut request = self.client.request(method, &url).timeout(self.timeout);
        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }
        request = request.body(body.0.clone());

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                "local upstream timed out".to_string()
            } else {
                format!("local upstream unreachable: {err}")
            }
        })?;

        let status = response.status().as_u16();
        let mut out_headers = OrderedHeaders::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                out_headers.insert(name.as_str(), value);
            }
        }
        let body_bytes = response
            .bytes()
            .await
            .map_err(|err| format!("failed to read local upstream body: {err}"))?;

        Ok(LocalResponse { status, headers: out_headers, body: WireBody(body_bytes.to_vec()) })
    }
}
