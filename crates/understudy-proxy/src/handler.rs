//! hudsucker handler bridging hyper messages and the engine.
//!
//! CONNECT requests pass through untouched; hudsucker then asks
//! [`HttpHandler::should_intercept`] whether to terminate TLS for the target.
//! Decrypted requests come back through `handle_request` with an absolute
//! `https://` URI.

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Method, Request, Response, StatusCode},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;
use hyper::http::uri::Authority;

use understudy_core::{RequestDetails, ResponseDetails};

use crate::engine::ProxyEngine;
use crate::error::{ProxyError, Result};
use crate::upstream::is_hop_by_hop;

/// Body of the response to requests addressed to the proxy itself.
pub const SELF_REQUEST_BODY: &str =
    "This is a proxy server. Does not respond to non-proxy requests.";

fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// Destination as recorded: the authority without the scheme's default port.
fn destination(scheme: &str, authority: &Authority) -> String {
    match (scheme, authority.port_u16()) {
        ("https", Some(443)) | ("http", Some(80)) => authority.host().to_string(),
        _ => authority.as_str().to_string(),
    }
}

/// Reads a proxied request into the engine's model.
pub async fn to_details(req: Request<Body>) -> Result<RequestDetails> {
    let (parts, body) = req.into_parts();
    let authority = parts
        .uri
        .authority()
        .ok_or_else(|| ProxyError::Http(format!("no authority in {}", parts.uri)))?;
    let scheme = parts.uri.scheme_str().unwrap_or("http").to_string();

    let mut details = RequestDetails::new(
        parts.method.as_str(),
        scheme.clone(),
        destination(&scheme, authority),
        parts.uri.path(),
    )
    .with_query(parts.uri.query().unwrap_or_default());

    for (name, value) in &parts.headers {
        details.add_header(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }

    details.body = body
        .collect()
        .await
        .map_err(|e| ProxyError::Http(format!("failed to read request body: {}", e)))?
        .to_bytes()
        .to_vec();
    Ok(details)
}

/// Builds the hyper response written to the client.
///
/// Connection-scoped headers are dropped; hyper frames the body itself.
pub fn to_response(details: ResponseDetails) -> Response<Body> {
    let mut builder = Response::builder().status(details.status);
    for (name, values) in &details.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    match builder.body(bytes_to_body(Bytes::from(details.body))) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to build response: {}", e);
            let mut response = Response::new(bytes_to_body(Bytes::from(format!(
                "Understudy Error! Could not build response. Got error: {}\n",
                e
            ))));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Response to a request that names no destination.
pub fn self_response() -> Response<Body> {
    to_response(
        ResponseDetails::new(500, SELF_REQUEST_BODY).with_header("Content-Type", "text/plain"),
    )
}

/// HTTP handler for the intercepting proxy.
#[derive(Clone, Debug)]
pub struct ProxyHandler {
    engine: ProxyEngine,
}

impl ProxyHandler {
    /// Creates a handler dispatching to `engine`.
    pub fn new(engine: ProxyEngine) -> Self {
        Self { engine }
    }
}

impl HttpHandler for ProxyHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }

        let host = match req.uri().host() {
            Some(host) => host.to_string(),
            None => {
                tracing::debug!("Non-proxy request for {}", req.uri());
                return RequestOrResponse::Response(self_response());
            }
        };

        if !self.engine.matches_destination(&host) {
            tracing::debug!("Passing through {} (outside destination)", host);
            return RequestOrResponse::Request(req);
        }

        let details = match to_details(req).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!("Malformed request for {}: {}", host, e);
                let response = crate::engine::error_response(400, "Malformed request", &e);
                return RequestOrResponse::Response(to_response(response));
            }
        };

        let response = self.engine.process(details).await;
        RequestOrResponse::Response(to_response(response))
    }

    async fn should_intercept(&mut self, _ctx: &HttpContext, req: &Request<Body>) -> bool {
        match req.uri().host() {
            Some(host) => {
                let intercept = self.engine.matches_destination(host);
                if !intercept {
                    tracing::debug!("Tunnelling {} without interception", host);
                }
                intercept
            }
            None => false,
        }
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("X-Trace", "a")
            .header("X-Trace", "b")
            .body(bytes_to_body(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[test]
    fn test_default_ports_are_dropped() {
        let authority: Authority = "example.com:443".parse().unwrap();
        assert_eq!(destination("https", &authority), "example.com");
        assert_eq!(destination("http", &authority), "example.com:443");

        let authority: Authority = "example.com:80".parse().unwrap();
        assert_eq!(destination("http", &authority), "example.com");

        let authority: Authority = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(destination("http", &authority), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_request_is_converted() {
        let details = to_details(request(
            "https://api.example.com:443/items?page=2",
            r#"{"a":1}"#,
        ))
        .await
        .unwrap();

        assert_eq!(details.method, "POST");
        assert_eq!(details.scheme, "https");
        assert_eq!(details.destination, "api.example.com");
        assert_eq!(details.path, "/items");
        assert_eq!(details.query, "page=2");
        assert_eq!(details.body, br#"{"a":1}"#);
        assert_eq!(details.header("Content-Type"), Some("application/json"));
        assert_eq!(details.header_values("x-trace"), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_request_without_authority_is_rejected() {
        let err = to_details(request("/relative", "")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Http(_)));
    }

    #[tokio::test]
    async fn test_response_drops_connection_headers() {
        let response = to_response(
            ResponseDetails::new(201, "done")
                .with_header("Content-Type", "text/plain")
                .with_header("Transfer-Encoding", "chunked")
                .with_header("Content-Length", "999")
                .with_header("Set-Cookie", "a=1")
                .with_header("Set-Cookie", "b=2"),
        );

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("transfer-encoding").is_none());
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "done");
    }

    #[tokio::test]
    async fn test_invalid_status_becomes_internal_error() {
        let response = to_response(ResponseDetails::new(0, "nothing"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_self_response_identifies_proxy() {
        let response = self_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, SELF_REQUEST_BODY);
    }
}
