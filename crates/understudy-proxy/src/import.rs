//! Loading recorded pairs from files, URLs and envelopes.

use std::path::{Path, PathBuf};

use understudy_core::fingerprint::{self, FingerprintKey};
use understudy_core::{RecordsView, RequestDetails, RequestResponsePair};

use crate::error::{ProxyError, Result};

/// Where an import reads its envelope from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// Local `.json` file.
    File(PathBuf),
    /// Remote envelope fetched with `GET`.
    Url(String),
}

impl ImportSource {
    /// Classifies `location` as a URL or a file.
    ///
    /// Files must carry a `.json` extension and exist.
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            return Ok(Self::Url(location.to_string()));
        }

        let path = Path::new(location);
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if !is_json {
            return Err(ProxyError::Import(format!(
                "only JSON files are accepted, given file: {}",
                location
            )));
        }
        if !path.exists() {
            return Err(ProxyError::Import(format!(
                "given file '{}' does not exist",
                location
            )));
        }
        Ok(Self::File(path.to_path_buf()))
    }

    /// Reads and decodes the envelope.
    pub async fn load(&self, client: &reqwest::Client) -> Result<RecordsView> {
        let bytes = match self {
            Self::File(path) => tokio::fs::read(path).await?,
            Self::Url(url) => {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| ProxyError::Import(format!("failed to fetch {}: {}", url, e)))?;
                if !response.status().is_success() {
                    return Err(ProxyError::Import(format!(
                        "failed to fetch {}: status {}",
                        url,
                        response.status()
                    )));
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| ProxyError::Import(e.to_string()))?
                    .to_vec()
            }
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl std::fmt::Display for ImportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Content type assumed for an imported request that carries none.
fn sniff_content_type(body: &[u8]) -> &'static str {
    let is_json_object = matches!(
        serde_json::from_slice::<serde_json::Value>(body),
        Ok(serde_json::Value::Object(_))
    );
    if is_json_object {
        "application/json"
    } else if std::str::from_utf8(body).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn fill_content_type(request: &mut RequestDetails) {
    if request.header("Content-Type").is_none() {
        let content_type = sniff_content_type(&request.body);
        request.add_header("Content-Type", content_type);
    }
}

/// Converts an envelope into keyed pairs ready for the cache.
///
/// Keys are recomputed from each request, so stale or missing keys in the
/// source are irrelevant. Entries that fail to decode are skipped and
/// reported in the failure count.
pub fn prepare(view: RecordsView) -> Result<(Vec<(FingerprintKey, RequestResponsePair)>, usize)> {
    if view.data.is_empty() {
        return Err(ProxyError::Import("nothing to import".to_string()));
    }

    let mut pairs = Vec::with_capacity(view.data.len());
    let mut failed = 0;
    for entry in view.data {
        match RequestResponsePair::from_view(entry) {
            Ok(mut pair) => {
                fill_content_type(&mut pair.request);
                pairs.push((fingerprint::key(&pair.request), pair));
            }
            Err(e) => {
                tracing::error!("Failed to decode imported pair: {}", e);
                failed += 1;
            }
        }
    }
    Ok((pairs, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use understudy_core::ResponseDetails;

    fn envelope() -> RecordsView {
        let pair = RequestResponsePair::new(
            RequestDetails::new("GET", "http", "example.com", "/path1"),
            ResponseDetails::new(201, "recorded"),
        )
        .with_request_type("snapshot");
        RecordsView {
            data: vec![pair.to_view()],
        }
    }

    #[test]
    fn test_parse_url() {
        assert_eq!(
            ImportSource::parse("https://example.com/records.json").unwrap(),
            ImportSource::Url("https://example.com/records.json".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_non_json_file() {
        let err = ImportSource::parse("records.txt").unwrap_err();
        assert!(matches!(err, ProxyError::Import(_)));
    }

    #[test]
    fn test_parse_rejects_missing_file() {
        let err = ImportSource::parse("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&serde_json::to_vec(&envelope()).unwrap())
            .unwrap();

        let source = ImportSource::parse(path.to_str().unwrap()).unwrap();
        let view = source.load(&reqwest::Client::new()).await.unwrap();
        assert_eq!(view, envelope());
    }

    #[tokio::test]
    async fn test_load_file_with_bad_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();

        let source = ImportSource::parse(path.to_str().unwrap()).unwrap();
        let err = source.load(&reqwest::Client::new()).await.unwrap_err();
        assert!(matches!(err, ProxyError::Json(_)));
    }

    #[test]
    fn test_prepare_recomputes_keys_and_keeps_request_type() {
        let (pairs, failed) = prepare(envelope()).unwrap();
        assert_eq!(failed, 0);
        assert_eq!(pairs.len(), 1);

        let (key, pair) = &pairs[0];
        assert_eq!(*key, fingerprint::key(&pair.request));
        assert_eq!(pair.request_type.as_deref(), Some("snapshot"));
    }

    #[test]
    fn test_prepare_rejects_empty_envelope() {
        assert!(prepare(RecordsView::default()).is_err());
    }

    #[test]
    fn test_prepare_counts_undecodable_entries() {
        let mut view = envelope();
        let mut bad = view.data[0].clone();
        bad.response.encoded_body = true;
        bad.response.body = "%%% not base64".to_string();
        view.data.push(bad);

        let (pairs, failed) = prepare(view).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(failed, 1);
    }

    #[test]
    fn test_content_type_is_sniffed_when_missing() {
        let mut json = RequestDetails::new("POST", "http", "example.com", "/")
            .with_body(r#"{"a": 1}"#);
        fill_content_type(&mut json);
        assert_eq!(json.header("Content-Type"), Some("application/json"));

        let mut text = RequestDetails::new("POST", "http", "example.com", "/").with_body("a=1");
        fill_content_type(&mut text);
        assert_eq!(
            text.header("Content-Type"),
            Some("text/plain; charset=utf-8")
        );

        let mut explicit = RequestDetails::new("POST", "http", "example.com", "/")
            .with_header("content-type", "application/xml")
            .with_body("<a/>");
        fill_content_type(&mut explicit);
        assert_eq!(explicit.header_values("Content-Type").len(), 1);
        assert_eq!(explicit.header("Content-Type"), Some("application/xml"));
    }

    #[test]
    fn test_sniffed_json_is_minified_for_matching() {
        let pretty = RecordsView {
            data: vec![RequestResponsePair::new(
                RequestDetails::new("POST", "http", "example.com", "/")
                    .with_body("{\n  \"a\": 1\n}"),
                ResponseDetails::new(200, ""),
            )
            .to_view()],
        };
        let (pairs, _) = prepare(pretty).unwrap();

        let live = RequestDetails::new("POST", "http", "example.com", "/")
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"a":1}"#);
        assert_eq!(pairs[0].0, fingerprint::key(&live));
    }
}
