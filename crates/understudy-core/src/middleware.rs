//! Out-of-process transform bridge.
//!
//! A transform rewrites a request/response pair. It is either a local
//! program, started once per call with the JSON envelope on stdin and the
//! rewritten envelope read from stdout, or a remote HTTP endpoint that
//! receives the envelope as a `POST` body.
//!
//! ```text
//! pair ──► {"request": .., "response": .., "id": ..} ──► transform
//!                                                          │
//! pair ◄── decode ◄──────── stdout / response body ◄───────┘
//! ```
//!
//! Invocations share no state and may run concurrently. When a timeout is
//! set, a local process that overruns it is killed.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::TransformError;
use crate::models::{MiddlewarePayload, RequestResponsePair};

/// What the bridge invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// A local program and its arguments.
    Command {
        /// Program to execute.
        program: String,
        /// Arguments passed verbatim.
        args: Vec<String>,
    },
    /// A remote endpoint receiving the envelope over HTTP.
    Remote {
        /// Endpoint URL.
        url: String,
    },
}

impl Transform {
    /// Parses a transform definition.
    ///
    /// Values starting with `http://` or `https://` are remote transforms;
    /// anything else is a command line split on whitespace.
    pub fn parse(definition: &str) -> Result<Self, TransformError> {
        let definition = definition.trim();
        if definition.starts_with("http://") || definition.starts_with("https://") {
            return Ok(Self::Remote {
                url: definition.to_string(),
            });
        }

        let mut parts = definition.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| TransformError::Invalid("empty transform command".into()))?;

        Ok(Self::Command {
            program,
            args: parts.collect(),
        })
    }

    /// Human-readable form, used in logs and error responses.
    pub fn describe(&self) -> String {
        match self {
            Self::Command { program, args } if args.is_empty() => program.clone(),
            Self::Command { program, args } => format!("{} {}", program, args.join(" ")),
            Self::Remote { url } => url.clone(),
        }
    }
}

impl std::fmt::Display for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Runs a [`Transform`] over request/response pairs.
#[derive(Debug, Clone)]
pub struct MiddlewareBridge {
    transform: Transform,
    timeout: Option<Duration>,
    client: reqwest::Client,
}

impl MiddlewareBridge {
    /// Creates a bridge with no timeout.
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            timeout: None,
            client: reqwest::Client::new(),
        }
    }

    /// Parses a transform definition and creates a bridge for it.
    pub fn from_definition(definition: &str) -> Result<Self, TransformError> {
        Ok(Self::new(Transform::parse(definition)?))
    }

    /// Sets the timeout after which an invocation fails.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the configured transform.
    pub fn transform_definition(&self) -> &Transform {
        &self.transform
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Passes `pair` through the transform and returns the rewritten pair.
    ///
    /// `id` is forwarded as the envelope `id`; callers use the request
    /// fingerprint.
    pub async fn transform(
        &self,
        pair: &RequestResponsePair,
        id: &str,
    ) -> Result<RequestResponsePair, TransformError> {
        let payload = MiddlewarePayload::new(pair, id);
        let input =
            serde_json::to_vec(&payload).map_err(|e| TransformError::Decode(e.to_string()))?;

        tracing::debug!("Running transform {} for {}", self.transform, id);

        let invocation = async {
            match &self.transform {
                Transform::Command { program, args } => {
                    run_command(program, args, &input).await
                }
                Transform::Remote { url } => self.call_remote(url, input.clone()).await,
            }
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .map_err(|_| TransformError::Timeout(limit))??,
            None => invocation.await?,
        };

        if output.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!("No output from transform {}, keeping pair", self.transform);
            return Ok(pair.clone());
        }

        let payload: MiddlewarePayload = serde_json::from_slice(&output).map_err(|e| {
            tracing::error!(
                "Failed to decode transform output: {} (output: {})",
                e,
                String::from_utf8_lossy(&output)
            );
            TransformError::Decode(e.to_string())
        })?;

        payload
            .into_pair()
            .map_err(|e| TransformError::Decode(e.to_string()))
    }

    async fn call_remote(&self, url: &str, input: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(input)
            .send()
            .await
            .map_err(|e| TransformError::Remote(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(TransformError::Remote(format!(
                "received {} from {}",
                response.status(),
                url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransformError::Remote(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Starts `program`, feeds `input` to stdin and collects stdout.
///
/// The child is killed if this future is dropped, which is how timeouts
/// terminate it.
async fn run_command(program: &str, args: &[String], input: &[u8]) -> Result<Vec<u8>, TransformError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TransformError::Spawn {
            command: program.to_string(),
            source,
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransformError::Invalid("transform stdin unavailable".into()))?;

    let write = async move {
        let result = stdin.write_all(input).await;
        drop(stdin);
        match result {
            // The transform may exit without reading its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    };

    let (written, output) = tokio::join!(write, child.wait_with_output());
    let output = output?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        tracing::error!(
            "Transform {} failed with {}: {}",
            program,
            output.status,
            stderr
        );
        return Err(TransformError::Exit {
            status: output.status.to_string(),
            stderr,
        });
    }
    written?;

    if !stderr.is_empty() {
        tracing::info!("Information from transform {}: {}", program, stderr);
    }

    Ok(output.stdout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{RequestDetails, ResponseDetails};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn sample_pair() -> RequestResponsePair {
        RequestResponsePair::new(
            RequestDetails::new("GET", "http", "example.com", "/path1")
                .with_header("New-Header", "yes"),
            ResponseDetails::new(200, "original"),
        )
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_parse_command_with_args() {
        let transform = Transform::parse("python3 /tmp/mw.py --flag").unwrap();
        assert_eq!(
            transform,
            Transform::Command {
                program: "python3".into(),
                args: vec!["/tmp/mw.py".into(), "--flag".into()],
            }
        );
        assert_eq!(transform.describe(), "python3 /tmp/mw.py --flag");
    }

    #[test]
    fn test_parse_remote() {
        let transform = Transform::parse("http://localhost:9000/process").unwrap();
        assert_eq!(
            transform,
            Transform::Remote {
                url: "http://localhost:9000/process".into()
            }
        );
    }

    #[test]
    fn test_parse_empty_is_invalid() {
        assert!(matches!(
            Transform::parse("   "),
            Err(TransformError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_transform_returns_same_pair() {
        let bridge = MiddlewareBridge::from_definition("cat").unwrap();
        let pair = sample_pair();
        let out = bridge.transform(&pair, "id-1").await.unwrap();
        assert_eq!(out, pair);
    }

    #[tokio::test]
    async fn test_script_sees_envelope_and_rewrites_response() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            dir.path(),
            "flag.sh",
            r#"input=$(cat)
case "$input" in
  *'"New-Header"'*) body="header present" ;;
  *) body="header missing" ;;
esac
case "$input" in
  *'"id":"id-7"'*) ;;
  *) body="no id" ;;
esac
printf '{"request":{"method":"GET","destination":"example.com","path":"/path1"},"response":{"status":200,"body":"%s","encodedBody":false,"headers":{}}}' "$body""#,
        );

        let bridge = MiddlewareBridge::from_definition(&script).unwrap();
        let out = bridge.transform(&sample_pair(), "id-7").await.unwrap();
        assert_eq!(out.response.body, b"header present");
        assert_eq!(out.response.status, 200);
    }

    #[tokio::test]
    async fn test_empty_output_keeps_pair() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "silent.sh", "cat > /dev/null");

        let bridge = MiddlewareBridge::from_definition(&script).unwrap();
        let pair = sample_pair();
        assert_eq!(bridge.transform(&pair, "id").await.unwrap(), pair);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 3");

        let bridge = MiddlewareBridge::from_definition(&script).unwrap();
        match bridge.transform(&sample_pair(), "id").await {
            Err(TransformError::Exit { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected exit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "garbage.sh", "cat > /dev/null\necho 'not json'");

        let bridge = MiddlewareBridge::from_definition(&script).unwrap();
        assert!(matches!(
            bridge.transform(&sample_pair(), "id").await,
            Err(TransformError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let bridge = MiddlewareBridge::from_definition("/nonexistent/transform-binary").unwrap();
        assert!(matches!(
            bridge.transform(&sample_pair(), "id").await,
            Err(TransformError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_transform_times_out() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 5\ncat");

        let bridge = MiddlewareBridge::from_definition(&script)
            .unwrap()
            .with_timeout(Some(Duration::from_millis(200)));

        let started = std::time::Instant::now();
        let result = bridge.transform(&sample_pair(), "id").await;
        assert!(matches!(result, Err(TransformError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_an_error() {
        let bridge = MiddlewareBridge::from_definition("http://127.0.0.1:1/transform").unwrap();
        assert!(matches!(
            bridge.transform(&sample_pair(), "id").await,
            Err(TransformError::Remote(_))
        ));
    }
}
