//! Intercepting proxy server.
//!
//! Binds the listener, wires the root authority and the engine into
//! hudsucker, and runs it in the background until shut down.

use std::net::SocketAddr;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::authority::InterceptAuthority;
use crate::ca::{CaManager, RootAuthority, DEFAULT_VALIDITY_DAYS};
use crate::engine::ProxyEngine;
use crate::error::{ProxyError, Result};
use crate::handler::ProxyHandler;
use crate::DEFAULT_PROXY_PORT;

/// Proxy server configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Where the root pair lives.
    pub ca_manager: CaManager,
    /// Replace the root pair even if one exists.
    pub regenerate_ca: bool,
    /// Validity of issued leaves, in days.
    pub leaf_validity_days: i64,
}

impl ProxyConfig {
    /// Creates a configuration on the default port.
    pub fn new(ca_manager: CaManager) -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            ca_manager,
            regenerate_ca: false,
            leaf_validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Forces generation of a fresh root pair.
    pub fn with_regenerate_ca(mut self, regenerate: bool) -> Self {
        self.regenerate_ca = regenerate;
        self
    }
}

/// Proxy server, ready to start.
pub struct ProxyServer {
    config: ProxyConfig,
    root: RootAuthority,
    engine: ProxyEngine,
}

impl ProxyServer {
    /// Loads or generates the root pair.
    ///
    /// A root that can be neither loaded nor generated is fatal.
    pub fn new(config: ProxyConfig, engine: ProxyEngine) -> Result<Self> {
        let root = if config.regenerate_ca {
            config.ca_manager.generate_ca()?
        } else {
            config.ca_manager.ensure_ca()?
        };

        Ok(Self {
            config,
            root,
            engine,
        })
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the root certificate path for user installation.
    pub fn ca_cert_path(&self) -> std::path::PathBuf {
        self.config.ca_manager.cert_path()
    }

    /// Returns the root certificate as PEM.
    pub fn ca_cert_pem(&self) -> &str {
        self.root.cert_pem()
    }

    /// The engine requests are dispatched to.
    pub fn engine(&self) -> &ProxyEngine {
        &self.engine
    }

    /// Binds the listener and starts the proxy in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub async fn start(self) -> Result<ProxyHandle> {
        let listener = TcpListener::bind(self.config.addr).await?;
        let addr = listener.local_addr()?;

        let authority = InterceptAuthority::new(self.root)?
            .with_validity_days(self.config.leaf_validity_days);
        let handler = ProxyHandler::new(self.engine);

        let proxy = Proxy::builder()
            .with_listener(listener)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        tracing::info!("Proxy listening on {}", addr);
        tracing::info!("CA certificate: {:?}", self.config.ca_manager.cert_path());

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            tokio::select! {
                result = proxy.start() => {
                    if let Err(e) = result {
                        tracing::error!("Proxy error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Proxy shutdown signal received");
                }
            };
        });

        Ok(ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}
