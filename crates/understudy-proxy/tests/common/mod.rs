//! Shared fixtures for the proxy integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;

use understudy_core::{MiddlewareBridge, Mode};
use understudy_proxy::{
    CaManager, EngineConfig, KeyAlgorithm, ProxyConfig, ProxyEngine, ProxyHandle, ProxyServer,
};
use understudy_storage::MemoryCache;

/// Local upstream answering `GET /path1` with `201 created`.
pub async fn spawn_upstream(hits: Arc<AtomicUsize>) -> SocketAddr {
    let app = Router::new()
        .route(
            "/path1",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::CREATED, "created")
            }),
        )
        .with_state(hits);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Running proxy plus everything a test needs to drive it.
pub struct TestProxy {
    pub handle: ProxyHandle,
    pub engine: ProxyEngine,
    pub ca_manager: CaManager,
    pub dir: TempDir,
}

impl TestProxy {
    /// Starts a proxy on an ephemeral port with in-memory caches.
    pub async fn start(config: EngineConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let engine = ProxyEngine::new(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();

        let ca_manager =
            CaManager::new(dir.path().join("ca")).with_algorithm(KeyAlgorithm::EcdsaP256);
        let server = ProxyServer::new(
            ProxyConfig::new(ca_manager.clone()).with_port(0),
            engine.clone(),
        )
        .unwrap();
        let handle = server.start().await.unwrap();

        Self {
            handle,
            engine,
            ca_manager,
            dir,
        }
    }

    /// Client sending every plain HTTP request through the proxy.
    pub fn client(&self) -> reqwest::Client {
        let proxy = reqwest::Proxy::http(format!("http://{}", self.handle.addr())).unwrap();
        reqwest::Client::builder().proxy(proxy).build().unwrap()
    }

    pub async fn stop(self) {
        self.handle.stop().await;
    }
}

/// Writes `body` as a shell script and returns a bridge running it.
#[cfg(unix)]
pub fn script(dir: &TempDir, name: &str, body: &str) -> MiddlewareBridge {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    MiddlewareBridge::from_definition(&format!("sh {}", path.display())).unwrap()
}

pub fn mode_config(mode: Mode) -> EngineConfig {
    EngineConfig::default().with_mode(mode)
}
