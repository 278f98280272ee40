//! The tunnel control protocol (spec §4.4, §6 "Wire format invariants").
//!
//! JSON-framed messages over the control WebSocket, each carrying a `type`
//! discriminant. `body` fields are base64-encoded bytes; `headers` is an
//! ordered map (multi-valued headers joined with `, `); `request_id` is a
//! 32-char lowercase hex string (a hex-encoded 128-bit id).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// 128-bit opaque id used to correlate tunnel frames, hex-encoded on the
/// wire as a 32-char lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u128);

impl RequestId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().as_u128())
    }

    pub fn as_hex(&self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(Self)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl Serialize for RequestId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RequestId::parse_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid request_id hex"))
    }
}

/// An ordered string/string header map. Duplicate header names collapse
/// into one entry with values joined by `", "`, matching the wire
/// invariant that multi-valued headers are represented as a single joined
/// string value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedHeaders(pub Vec<(String, String)>);

impl OrderedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            existing.1 = format!("{}, {}", existing.1, value);
        } else {
            self.0.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    /// Total encoded size, used to enforce the 8 KiB header-block limit.
    pub fn byte_len(&self) -> usize {
        self.0.iter().map(|(k, v)| k.len() + v.len() + 2).sum()
    }
}

impl Serialize for OrderedHeaders {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderedHeaders {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedHeadersVisitor;

        impl<'de> serde::de::Visitor<'de> for OrderedHeadersVisitor {
            type Value = OrderedHeaders;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of header name to header value")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((k, v)) = map.next_entry::<String, String>()? {
                    entries.push((k, v));
                }
                Ok(OrderedHeaders(entries))
            }
        }

        deserializer.deserialize_map(OrderedHeadersVisitor)
    }
}

/// Base64 body bytes, per the wire invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBody(pub Vec<u8>);

impl Serialize for WireBody {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for WireBody {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64
            .decode(s.as_bytes())
            .map(WireBody)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 body: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelProtocolKind {
    Http,
    Tcp,
    Tls,
    Udp,
}

/// The control-plane frame set (spec §4.4 table). Tagged on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Init {
        version: u32,
        local_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdomain: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tunnel_id: Option<String>,
        #[serde(default = "default_protocol")]
        protocol: TunnelProtocolKind,
    },
    TunnelCreated {
        tunnel_id: String,
        subdomain: String,
        public_url: String,
        status: String,
    },
    Error {
        code: String,
        message: String,
    },
    HttpRequest {
        request_id: RequestId,
        method: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        headers: OrderedHeaders,
        body: WireBody,
    },
    HttpResponse {
        request_id: RequestId,
        status: u16,
        headers: OrderedHeaders,
        body: WireBody,
    },
    HttpError {
        request_id: RequestId,
        error: String,
        message: String,
    },
    Ping {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    UpdateTunnel {
        tunnel_id: String,
        local_url: String,
    },
}

fn default_protocol() -> TunnelProtocolKind {
    TunnelProtocolKind::Http
}

impl ControlFrame {
    pub fn to_json_bytes(&self) -> Vec<u8> {
        // `ControlFrame` only ever contains types we construct ourselves, so
        // serialization cannot fail.
        serde_json::to_vec(self).expect("ControlFrame always serializes")
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Normalizes an inbound public-request path per the sanitization rules in
/// spec §4.4 step 3: strips `..`, `//`, `%00` sequences.
pub fn sanitize_path(path: &str) -> String {
    let mut cleaned = path.replace("%00", "").replace("..", "");
    while cleaned.contains("//") {
        cleaned = cleaned.replace("//", "/");
    }
    if !cleaned.starts_with('/') {
        cleaned.insert(0, '/');
    }
    cleaned
}

pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD"];

pub const MAX_PATH_LEN: usize = 2048;
pub const MAX_HEADER_BLOCK_BYTES: usize = 8 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_round_trips_hex() {
        let id = RequestId::new_random();
        let hex = id.as_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(RequestId::parse_hex(&hex), Some(id));
    }

    #[test]
    fn request_id_rejects_malformed_hex() {
        assert_eq!(RequestId::parse_hex("not-hex"), None);
        assert_eq!(RequestId::parse_hex(&"a".repeat(31)), None);
        assert_eq!(RequestId::parse_hex(&"A".repeat(32)), None);
    }

    #[test]
    fn ordered_headers_join_duplicates() {
        let mut headers = OrderedHeaders::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("set-cookie", "b=2");
        assert_eq!(headers.get("Set-Cookie"), Some("a=1, b=2"));
        assert_eq!(headers.0.len(), 1);
    }

    #[test]
    fn http_request_frame_round_trips_exactly() {
        let mut headers = OrderedHeaders::new();
        headers.insert("content-type", "application/json");
        headers.insert("x-custom", "value");
        let frame = ControlFrame::HttpRequest {
            request_id: RequestId::new_random(),
            method: "POST".to_string(),
            path: "/health".to_string(),
            query: Some("a=1".to_string()),
            headers,
            body: WireBody(b"{\"ok\":true}".to_vec()),
        };
        let bytes = frame.to_json_bytes();
        let decoded = ControlFrame::from_json_bytes(&bytes).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn sanitize_path_strips_traversal_and_double_slash() {
        assert_eq!(sanitize_path("/a/../b"), "/a/b");
        assert_eq!(sanitize_path("/a//b"), "/a/b");
        assert_eq!(sanitize_path("/a%00b"), "/ab");
        assert_eq!(sanitize_path("no-leading-slash"), "/no-leading-slash");
    }

    #[test]
    fn header_block_boundary_exactly_8kib_is_not_over() {
        let value = "x".repeat(MAX_HEADER_BLOCK_BYTES - "name".len() - 2);
        let mut headers = OrderedHeaders::new();
        headers.insert("name", value);
        assert_eq!(headers.byte_len(), MAX_HEADER_BLOCK_BYTES);
    }
}
