//! Request fingerprinting and pair encoding.
//!
//! A fingerprint is the lowercase hex SHA-256 of the replay-relevant parts of
//! a request: destination, path, method, query and body. The scheme and
//! headers are left out so a pair recorded over HTTPS also answers plain
//! HTTP. A few normalizations keep equivalent requests on the same key:
//!
//! - the destination is lowercased
//! - query pairs are sorted
//! - JSON bodies are re-serialized compactly with sorted keys
//! - whitespace between XML tags is dropped
//!
//! Keys depend on nothing but the request, so they survive restarts.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{RequestDetails, RequestResponsePair, RequestResponsePairView};

static JSON_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/+]json(;.*)?$").expect("valid JSON content-type pattern"));
static XML_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[/+]xml(;.*)?$").expect("valid XML content-type pattern"));
static XML_INTER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">\s+<").expect("valid XML whitespace pattern"));

/// Cache key derived from a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintKey(String);

impl FingerprintKey {
    /// Returns the key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key bytes used for storage.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Xml,
    Other,
}

fn body_kind(request: &RequestDetails) -> BodyKind {
    for value in request.header_values("Content-Type") {
        let value = value.trim().to_ascii_lowercase();
        if JSON_CONTENT_TYPE.is_match(&value) {
            return BodyKind::Json;
        }
        if XML_CONTENT_TYPE.is_match(&value) {
            return BodyKind::Xml;
        }
    }
    BodyKind::Other
}

/// Body bytes as they take part in the fingerprint.
fn normalized_body(request: &RequestDetails) -> Vec<u8> {
    match body_kind(request) {
        BodyKind::Json => match serde_json::from_slice::<serde_json::Value>(&request.body) {
            Ok(value) => value.to_string().into_bytes(),
            Err(e) => {
                tracing::warn!(
                    "Failed to minify JSON body for {}{}, matching may fail: {}",
                    request.destination,
                    request.path,
                    e
                );
                request.body.clone()
            }
        },
        BodyKind::Xml => match std::str::from_utf8(&request.body) {
            Ok(text) => XML_INTER_TAG
                .replace_all(text.trim(), "><")
                .into_owned()
                .into_bytes(),
            Err(_) => request.body.clone(),
        },
        BodyKind::Other => request.body.clone(),
    }
}

fn normalized_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}

/// Feeds one length-prefixed component, so adjacent fields never run together.
fn update_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field);
}

/// Derives the cache key of a request.
pub fn key(request: &RequestDetails) -> FingerprintKey {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, request.destination.to_ascii_lowercase().as_bytes());
    update_field(&mut hasher, request.path.as_bytes());
    update_field(&mut hasher, request.method.as_bytes());
    update_field(&mut hasher, normalized_query(&request.query).as_bytes());
    if request.body.is_empty() {
        update_field(&mut hasher, &[]);
    } else {
        update_field(&mut hasher, &normalized_body(request));
    }

    FingerprintKey(hex::encode(hasher.finalize()))
}

/// Encodes a pair into the bytes stored in the cache.
pub fn encode(pair: &RequestResponsePair) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&pair.to_view())?)
}

/// Decodes cache bytes back into a pair.
pub fn decode(bytes: &[u8]) -> Result<RequestResponsePair> {
    let view: RequestResponsePairView = serde_json::from_slice(bytes)?;
    RequestResponsePair::from_view(view)
}
