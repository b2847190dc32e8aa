//! Command line and environment configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use thiserror::Error;

use understudy_core::{MiddlewareBridge, Mode, TransformError};
use understudy_proxy::ca::{KeyAlgorithm, DEFAULT_CERT_NAME, DEFAULT_CERT_ORG};
use understudy_proxy::{EngineConfig, UpstreamConfig, DEFAULT_DESTINATION, DEFAULT_PROXY_PORT};
use understudy_server::{DEFAULT_HOST, DEFAULT_PORT};

/// Configuration errors; all of them stop startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// More than one mode flag was given.
    #[error("only one of --capture, --simulate, --modify, --synthesize may be given (got {0})")]
    ConflictingModes(String),

    /// The chosen mode needs a transform.
    #[error("{0} mode chosen although middleware not supplied")]
    MissingMiddleware(Mode),

    /// The transform definition is unusable.
    #[error("invalid middleware: {0}")]
    Middleware(#[from] TransformError),

    /// Host and port do not form a socket address.
    #[error("invalid listen address {0}")]
    Address(String),
}

/// Storage backend for recorded pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Single-file SQLite database.
    Sqlite,
    /// Process memory, lost on exit.
    Memory,
}

/// Understudy - record, replay and rewrite HTTP(S) traffic
#[derive(Parser, Debug)]
#[command(name = "understudy", version, about)]
pub struct Args {
    /// Proxy listen port
    #[arg(short = 'p', long, env = "ProxyPort", default_value_t = DEFAULT_PROXY_PORT)]
    pub proxy_port: u16,

    /// Admin API listen port
    #[arg(short = 'a', long, env = "AdminPort", default_value_t = DEFAULT_PORT)]
    pub admin_port: u16,

    /// Bind address for both listeners
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = Backend::Sqlite)]
    pub db: Backend,

    /// Database file for the sqlite backend
    #[arg(long, env = "UnderstudyDB", default_value = "requests.db")]
    pub db_path: PathBuf,

    /// Transform command line or http(s):// URL
    #[arg(long, env = "UnderstudyMiddleware")]
    pub middleware: Option<String>,

    /// Seconds before a transform invocation is abandoned
    #[arg(long)]
    pub middleware_timeout: Option<u64>,

    /// Start in capture mode
    #[arg(long)]
    pub capture: bool,

    /// Start in simulate mode
    #[arg(long)]
    pub simulate: bool,

    /// Start in modify mode (requires --middleware)
    #[arg(long)]
    pub modify: bool,

    /// Start in synthesize mode (requires --middleware)
    #[arg(long)]
    pub synthesize: bool,

    /// Regex of hosts to process; others pass through untouched
    #[arg(long, default_value = DEFAULT_DESTINATION)]
    pub destination: String,

    /// JSON file or URL to import at startup (repeatable)
    #[arg(long = "import")]
    pub imports: Vec<String>,

    /// Directory holding the root certificate pair
    #[arg(long)]
    pub ca_dir: Option<PathBuf>,

    /// Root certificate common name
    #[arg(long, default_value = DEFAULT_CERT_NAME)]
    pub cert_name: String,

    /// Root certificate organization
    #[arg(long, default_value = DEFAULT_CERT_ORG)]
    pub cert_org: String,

    /// Key algorithm of a newly generated root (rsa2048 or ecdsa-p256)
    #[arg(long, default_value = "rsa2048")]
    pub key_algorithm: KeyAlgorithm,

    /// Regenerate the root certificate pair even if one exists
    #[arg(long)]
    pub generate_ca_cert: bool,

    /// Verify upstream TLS certificates
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub tls_verification: bool,

    /// Upstream request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub upstream_timeout: u64,

    /// Log per-mode counters every 10 seconds
    #[arg(long)]
    pub metrics: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write logs to daily files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Startup mode from the mode flags.
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        let chosen: Vec<Mode> = [
            (self.capture, Mode::Capture),
            (self.simulate, Mode::Simulate),
            (self.modify, Mode::Modify),
            (self.synthesize, Mode::Synthesize),
        ]
        .into_iter()
        .filter_map(|(set, mode)| set.then_some(mode))
        .collect();

        match chosen.as_slice() {
            [] => Ok(Mode::Virtualize),
            [mode] => Ok(*mode),
            modes => Err(ConfigError::ConflictingModes(
                modes
                    .iter()
                    .map(Mode::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Effective log level.
    pub fn log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// The configured transform, if any.
    pub fn middleware(&self) -> Result<Option<MiddlewareBridge>, ConfigError> {
        let Some(definition) = self.middleware.as_deref().filter(|d| !d.trim().is_empty())
        else {
            return Ok(None);
        };
        let timeout = self.middleware_timeout.map(Duration::from_secs);
        Ok(Some(
            MiddlewareBridge::from_definition(definition)?.with_timeout(timeout),
        ))
    }

    /// Engine settings. The destination regex is validated by the engine.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let mode = self.mode()?;
        let middleware = self.middleware()?;
        if mode.requires_transform() && middleware.is_none() {
            return Err(ConfigError::MissingMiddleware(mode));
        }

        Ok(EngineConfig {
            mode,
            destination: self.destination.clone(),
            middleware,
            upstream: UpstreamConfig {
                timeout: Duration::from_secs(self.upstream_timeout),
                tls_verification: self.tls_verification,
                ..UpstreamConfig::default()
            },
        })
    }

    fn addr(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        let candidate = format!("{}:{}", self.host, port);
        candidate
            .parse()
            .map_err(|_| ConfigError::Address(candidate))
    }

    /// Proxy listen address.
    pub fn proxy_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr(self.proxy_port)
    }
}
