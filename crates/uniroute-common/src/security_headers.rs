//! `SecurityHeadersLayer` (spec §4.8 "response headers on all HTTP
//! responses"): a body-generic `tower::Layer` so it can wrap the gateway,
//! admin, and tunnel-server routers alike without pulling a hard `axum`
//! dependency into this crate. Mirrors the teacher's own preference for the
//! standalone `http` crate in lower-layer crates (`gproxy-core` depends on
//! `http` directly rather than `axum`).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{HeaderValue, Request, Response};
use tower::{Layer, Service};

#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeadersLayer;

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SecurityHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // HSTS only makes sense when the request actually arrived over TLS;
        // this process doesn't terminate TLS itself, so it trusts the
        // `x-forwarded-proto` header a TLS-terminating reverse proxy sets.
        let is_https = request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("https"));

        let future = self.inner.call(request);
        Box::pin(async move {
            let mut response = future.await?;
            let headers = response.headers_mut();
            headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
            headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
            headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
            headers.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
            headers.insert(
                "referrer-policy",
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            );
            if is_https {
                headers.insert(
                    "strict-transport-security",
                    HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                );
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct Echo;

    impl Service<Request<Full<bytes::Bytes>>> for Echo {
        type Response = Response<Full<bytes::Bytes>>;
        type Error = std::convert::Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Full<bytes::Bytes>>) -> Self::Future {
            Box::pin(async { Ok(Response::new(Full::new(bytes::Bytes::new()))) })
        }
    }

    #[tokio::test]
    async fn adds_headers_without_hsts_over_plain_http() {
        let svc = SecurityHeadersLayer.layer(Echo);
        let request = Request::builder().body(Full::new(bytes::Bytes::new())).unwrap();
        let response = svc.oneshot(request).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
        assert_eq!(headers.get("content-security-policy").unwrap(), "default-src 'self'");
        assert_eq!(headers.get("referrer-policy").unwrap(), "strict-origin-when-cross-origin");
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn adds_hsts_when_forwarded_proto_is_https() {
        let svc = SecurityHeadersLayer.layer(Echo);
        let request = Request::builder()
            .header("x-forwarded-proto", "https")
            .body(Full::new(bytes::Bytes::new()))
            .unwrap();
        let response = svc.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("strict-transport-security").unwrap(),
            "max-age=31536000; includeSubDomains"
        );
    }
}
