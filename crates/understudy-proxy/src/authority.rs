//! Per-host leaf cache serving TLS configurations to the interceptor.
//!
//! A leaf issued for a host is reused until it expires. Issuance failures
//! fall back to a configuration with no certificate, so only that handshake
//! fails.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hudsucker::certificate_authority::CertificateAuthority;
use hudsucker::hyper::http::uri::Authority;
use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::rustls::server::{ClientHello, ResolvesServerCert};
use hudsucker::rustls::sign::CertifiedKey;
use hudsucker::rustls::ServerConfig;
use parking_lot::RwLock;

use crate::ca::{CaError, LeafCertificate, RootAuthority, DEFAULT_VALIDITY_DAYS};

/// Resolver used when no leaf could be issued.
#[derive(Debug)]
struct NoCertificate;

impl ResolvesServerCert for NoCertificate {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

struct CachedLeaf {
    config: Arc<ServerConfig>,
    expires_at: DateTime<Utc>,
}

/// Certificate authority handed to the interceptor.
pub struct InterceptAuthority {
    root: Arc<RootAuthority>,
    leaves: RwLock<HashMap<String, CachedLeaf>>,
    validity_days: i64,
    fallback: Arc<ServerConfig>,
}

impl std::fmt::Debug for InterceptAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptAuthority")
            .field("root", &self.root)
            .field("cached_hosts", &self.leaves.read().len())
            .field("validity_days", &self.validity_days)
            .finish()
    }
}

impl InterceptAuthority {
    /// Creates an authority issuing leaves from `root`.
    pub fn new(root: RootAuthority) -> Result<Self, CaError> {
        let fallback = ServerConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| CaError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(NoCertificate));

        Ok(Self {
            root: Arc::new(root),
            leaves: RwLock::new(HashMap::new()),
            validity_days: DEFAULT_VALIDITY_DAYS,
            fallback: Arc::new(fallback),
        })
    }

    /// Sets the validity of issued leaves, in days.
    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// The root signing every leaf.
    pub fn root(&self) -> &RootAuthority {
        &self.root
    }

    /// Number of hosts with a cached leaf.
    pub fn cached_hosts(&self) -> usize {
        self.leaves.read().len()
    }

    /// Returns the TLS configuration for `host`, issuing a leaf on a miss or
    /// after expiry.
    pub fn server_config(&self, host: &str) -> Result<Arc<ServerConfig>, CaError> {
        let host = host.to_ascii_lowercase();
        let now = Utc::now();

        if let Some(cached) = self.leaves.read().get(&host) {
            if cached.expires_at > now {
                return Ok(cached.config.clone());
            }
        }

        let leaf = self.root.issue_leaf(&host, self.validity_days)?;
        let expires_at = leaf.not_after;
        let config = Arc::new(build_server_config(leaf)?);

        tracing::debug!("Caching leaf certificate for {} until {}", host, expires_at);
        self.leaves.write().insert(
            host,
            CachedLeaf {
                config: config.clone(),
                expires_at,
            },
        );
        Ok(config)
    }

    fn server_config_or_fallback(&self, host: &str) -> Arc<ServerConfig> {
        match self.server_config(host) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to issue certificate for {}: {}", host, e);
                self.fallback.clone()
            }
        }
    }
}

fn build_server_config(leaf: LeafCertificate) -> Result<ServerConfig, CaError> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| CaError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(leaf.chain, leaf.key)
        .map_err(|e| CaError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

impl CertificateAuthority for InterceptAuthority {
    async fn gen_server_config(&self, authority: &Authority) -> Arc<ServerConfig> {
        self.server_config_or_fallback(authority.host())
    }
}
