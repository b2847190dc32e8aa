//! Forwarding to the real destination.

use std::time::Duration;

use understudy_core::{RequestDetails, ResponseDetails};

use crate::error::{ProxyError, Result};

/// Header added to every response obtained from a real destination.
pub const FORWARDED_HEADER: &str = "Understudy";
/// Value of [`FORWARDED_HEADER`].
pub const FORWARDED_VALUE: &str = "Was-Here";

/// Headers that belong to one hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Returns true for headers scoped to a single connection.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Upstream client settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Total time allowed for one exchange.
    pub timeout: Duration,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Verify upstream TLS certificates.
    pub tls_verification: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tls_verification: true,
        }
    }
}

/// Sends requests to their real destination.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
}

impl Upstream {
    /// Builds the client. Redirects are returned to the caller, not followed.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .danger_accept_invalid_certs(!config.tls_verification)
            .build()
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        if !config.tls_verification {
            tracing::warn!("Upstream TLS verification is disabled");
        }

        Ok(Self { client })
    }

    /// Forwards `request` and returns the real response, tagged with
    /// [`FORWARDED_HEADER`].
    pub async fn forward(&self, request: &RequestDetails) -> Result<ResponseDetails> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProxyError::Http(format!("invalid method {}: {}", request.method, e)))?;
        let url = request.url();

        let mut builder = self.client.request(method, &url);
        for (name, values) in &request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let upstream = builder.send().await.map_err(|e| {
            tracing::error!("Could not forward {} {}: {}", request.method, url, e);
            ProxyError::Upstream(e.to_string())
        })?;

        let status = upstream.status().as_u16();
        let mut response = ResponseDetails::new(status, Vec::new());
        for (name, value) in upstream.headers() {
            response.add_header(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        response.body = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?
            .to_vec();
        response.headers.remove(FORWARDED_HEADER);
        response.add_header(FORWARDED_HEADER, FORWARDED_VALUE);

        tracing::debug!(
            "Response from {} {}: {} ({} bytes)",
            request.method,
            url,
            status,
            response.body.len()
        );
        Ok(response)
    }
}
