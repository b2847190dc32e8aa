//! Understudy Proxy - intercepting HTTP/HTTPS proxy and mode engine.
//!
//! This crate turns the pieces in `understudy-core` into a running proxy:
//!
//! - [`ca`]: root certificate authority, persisted as PEM, issuing leaves
//! - [`authority`]: per-host leaf cache handed to the TLS interceptor
//! - [`engine`]: the mode state machine (virtualize, capture, simulate,
//!   modify, synthesize)
//! - [`upstream`]: forwarding to the real destination
//! - [`import`]: loading recorded pairs from files and URLs
//!
//! ## Architecture
//!
//! ```text
//! Client → Proxy → CONNECT? ──yes──▶ destination match? ──no──▶ tunnel
//!                     │                     │ yes
//!                     │ no                  ▼
//!                     │            leaf for host, TLS handshake
//!                     ▼                     │
//!            destination match? ◀───────────┘
//!                     │ yes
//!                     ▼
//!              ProxyEngine::process (mode snapshot)
//! ```

pub mod authority;
pub mod ca;
pub mod engine;
mod error;
mod handler;
pub mod import;
mod proxy;
pub mod upstream;

pub use authority::InterceptAuthority;
pub use ca::{CaManager, KeyAlgorithm, LeafCertificate, RootAuthority};
pub use engine::{error_response, EngineConfig, ProxyEngine, DEFAULT_DESTINATION};
pub use error::{CaError, ProxyError, Result};
pub use handler::{ProxyHandler, SELF_REQUEST_BODY};
pub use import::ImportSource;
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use upstream::{Upstream, UpstreamConfig, FORWARDED_HEADER, FORWARDED_VALUE};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 8500;
