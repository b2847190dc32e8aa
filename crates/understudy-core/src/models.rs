//! Request/response pair model.
//!
//! The in-memory types ([`RequestDetails`], [`ResponseDetails`],
//! [`RequestResponsePair`]) carry raw body bytes. The `*View` types are the
//! JSON form used for storage, the admin API and the transform envelope;
//! bodies that are not plain text travel as base64 with `encodedBody: true`.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Header multimap keyed by canonical header name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Canonical form of a header name: `content-type` becomes `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn header_values<'a>(headers: &'a Headers, name: &str) -> &'a [String] {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
        .unwrap_or(&[])
}

fn append_header(headers: &mut Headers, name: &str, value: impl Into<String>) {
    headers
        .entry(canonical_header_name(name))
        .or_default()
        .push(value.into());
}

/// Re-keys a header map so every name is canonical; values for names that
/// differ only by case are merged in order.
fn canonicalize(headers: Headers) -> Headers {
    let mut out = Headers::new();
    for (name, values) in headers {
        out.entry(canonical_header_name(&name))
            .or_default()
            .extend(values);
    }
    out
}

fn body_to_text(body: &[u8], force_base64: bool) -> (String, bool) {
    match std::str::from_utf8(body) {
        Ok(text) if !force_base64 => (text.to_string(), false),
        _ => (STANDARD.encode(body), true),
    }
}

fn body_from_text(body: String, encoded: bool) -> Result<Vec<u8>> {
    if encoded {
        Ok(STANDARD.decode(body.as_bytes())?)
    } else {
        Ok(body.into_bytes())
    }
}

/// An intercepted request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDetails {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// `http` or `https`.
    pub scheme: String,
    /// `host[:port]` as addressed by the client.
    pub destination: String,
    /// Request path without the query.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Request headers.
    pub headers: Headers,
}

impl RequestDetails {
    /// Creates a request with an empty body, query and header set.
    pub fn new(
        method: impl Into<String>,
        scheme: impl Into<String>,
        destination: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            scheme: scheme.into(),
            destination: destination.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Appends a header value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Appends a header value.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        append_header(&mut self.headers, name, value);
    }

    /// All values for a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> &[String] {
        header_values(&self.headers, name)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }

    /// Absolute URL of the request.
    pub fn url(&self) -> String {
        let scheme = if self.scheme.is_empty() {
            "http"
        } else {
            &self.scheme
        };
        if self.query.is_empty() {
            format!("{}://{}{}", scheme, self.destination, self.path)
        } else {
            format!("{}://{}{}?{}", scheme, self.destination, self.path, self.query)
        }
    }
}

/// A response, either real, recorded or fabricated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDetails {
    /// HTTP status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Response headers.
    pub headers: Headers,
}

impl ResponseDetails {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Headers::new(),
        }
    }

    /// Appends a header value.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Appends a header value.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        append_header(&mut self.headers, name, value);
    }

    /// All values for a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> &[String] {
        header_values(&self.headers, name)
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }

    /// Returns true if the body must travel as base64.
    ///
    /// Compressed bodies (any `Content-Encoding`) and bodies that are not
    /// valid UTF-8 are encoded.
    pub fn needs_encoding(&self) -> bool {
        !self.header_values("Content-Encoding").is_empty()
            || std::str::from_utf8(&self.body).is_err()
    }
}

/// One recorded exchange; the unit of persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestResponsePair {
    /// The request.
    pub request: RequestDetails,
    /// The response.
    pub response: ResponseDetails,
    /// How the pair was produced (`recording`, `snapshot`, ...).
    pub request_type: Option<String>,
}

impl RequestResponsePair {
    /// Creates a pair without a request type.
    pub fn new(request: RequestDetails, response: ResponseDetails) -> Self {
        Self {
            request,
            response,
            request_type: None,
        }
    }

    /// Sets the request type tag.
    pub fn with_request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = Some(request_type.into());
        self
    }

    /// Converts to the JSON view.
    pub fn to_view(&self) -> RequestResponsePairView {
        RequestResponsePairView::from(self)
    }

    /// Converts from the JSON view, decoding base64 bodies.
    pub fn from_view(view: RequestResponsePairView) -> Result<Self> {
        let (request, request_type) = view.request.into_details()?;
        let response = view.response.into_details()?;
        Ok(Self {
            request,
            response,
            request_type,
        })
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// JSON form of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetailsView {
    /// How the pair was produced.
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub body: String,
    /// Set when `body` is base64 (non UTF-8 request bodies).
    #[serde(default, skip_serializing_if = "is_false")]
    pub encoded_body: bool,
    #[serde(default)]
    pub headers: Headers,
}

impl RequestDetailsView {
    /// Builds the view of a request.
    pub fn from_details(details: &RequestDetails, request_type: Option<String>) -> Self {
        let (body, encoded_body) = body_to_text(&details.body, false);
        Self {
            request_type,
            path: details.path.clone(),
            method: details.method.clone(),
            destination: details.destination.clone(),
            scheme: details.scheme.clone(),
            query: details.query.clone(),
            body,
            encoded_body,
            headers: details.headers.clone(),
        }
    }

    /// Converts back into the request and its type tag.
    pub fn into_details(self) -> Result<(RequestDetails, Option<String>)> {
        let details = RequestDetails {
            method: self.method,
            scheme: self.scheme,
            destination: self.destination,
            path: self.path,
            query: self.query,
            body: body_from_text(self.body, self.encoded_body)?,
            headers: canonicalize(self.headers),
        };
        Ok((details, self.request_type))
    }
}

/// JSON form of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetailsView {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub encoded_body: bool,
    #[serde(default)]
    pub headers: Headers,
}

impl ResponseDetailsView {
    /// Converts back into a response, decoding a base64 body.
    pub fn into_details(self) -> Result<ResponseDetails> {
        Ok(ResponseDetails {
            status: self.status,
            body: body_from_text(self.body, self.encoded_body)?,
            headers: canonicalize(self.headers),
        })
    }
}

impl From<&ResponseDetails> for ResponseDetailsView {
    fn from(details: &ResponseDetails) -> Self {
        let (body, encoded_body) = body_to_text(&details.body, details.needs_encoding());
        Self {
            status: details.status,
            body,
            encoded_body,
            headers: details.headers.clone(),
        }
    }
}

/// JSON form of a pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResponsePairView {
    pub request: RequestDetailsView,
    pub response: ResponseDetailsView,
}

impl From<&RequestResponsePair> for RequestResponsePairView {
    fn from(pair: &RequestResponsePair) -> Self {
        Self {
            request: RequestDetailsView::from_details(&pair.request, pair.request_type.clone()),
            response: ResponseDetailsView::from(&pair.response),
        }
    }
}

/// The records envelope: `{"data": [pair, ...]}`.
///
/// Used by the admin API and import/export files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsView {
    #[serde(default)]
    pub data: Vec<RequestResponsePairView>,
}

/// The transform envelope exchanged with middleware.
///
/// Unlike [`RecordsView`] this carries a single pair, not wrapped in `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewarePayload {
    #[serde(default)]
    pub request: RequestDetailsView,
    #[serde(default)]
    pub response: ResponseDetailsView,
    #[serde(default)]
    pub id: String,
}

impl MiddlewarePayload {
    /// Wraps a pair for the transform.
    pub fn new(pair: &RequestResponsePair, id: impl Into<String>) -> Self {
        let view = pair.to_view();
        Self {
            request: view.request,
            response: view.response,
            id: id.into(),
        }
    }

    /// Unwraps the transform output into a pair.
    pub fn into_pair(self) -> Result<RequestResponsePair> {
        RequestResponsePair::from_view(RequestResponsePairView {
            request: self.request,
            response: self.response,
        })
    }
}
