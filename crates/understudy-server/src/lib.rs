//! Understudy Server - admin HTTP API.
//!
//! Exposes the engine's records, mode and counters over JSON.
//!
//! ## Endpoints
//!
//! - `GET /api/records` - All recorded pairs as `{"data": [...]}`
//! - `POST /api/records` - Import pairs (same envelope)
//! - `DELETE /api/records` - Remove every recorded pair
//! - `GET /api/count` - Number of recorded pairs
//! - `GET /api/stats` - Per-mode counters and record count
//! - `GET /api/state` / `POST /api/state` - Read or change mode and destination
//! - `GET /api/metadata` / `PUT /api/metadata` / `DELETE /api/metadata`
//! - `GET /api/health` - Liveness probe
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use understudy_proxy::{EngineConfig, ProxyEngine};
//! use understudy_server::{AppState, Server, ServerConfig};
//! use understudy_storage::MemoryCache;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = ProxyEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(MemoryCache::new()),
//!         Arc::new(MemoryCache::new()),
//!     )
//!     .unwrap();
//!     let server = Server::new(ServerConfig::default(), AppState::new(engine)).unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod error;
mod handlers;
pub mod models;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::{ApiError, Result};
pub use state::AppState;

/// Default admin port.
pub const DEFAULT_PORT: u16 = 8888;

/// Default server host (localhost only).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1).
    pub host: String,
    /// Port to bind to (default: 8888).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Sets the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),
}

/// Builds the API router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/records",
            get(handlers::get_records)
                .post(handlers::import_records)
                .delete(handlers::delete_records),
        )
        .route("/api/count", get(handlers::get_count))
        .route("/api/stats", get(handlers::get_stats))
        .route(
            "/api/state",
            get(handlers::get_state).post(handlers::set_state),
        )
        .route(
            "/api/metadata",
            get(handlers::get_metadata)
                .put(handlers::set_metadata)
                .delete(handlers::delete_metadata),
        )
        .route("/api/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

/// The admin API server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server with the given state.
    pub fn new(config: ServerConfig, state: AppState) -> std::result::Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ServerError::Runtime(format!("invalid address: {}", e)))?;

        Ok(Self {
            router: router(state),
            addr,
        })
    }

    /// Returns the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the listening socket.
    ///
    /// Kept separate from serving so bind failures surface before startup
    /// completes.
    pub fn bind(&self) -> std::result::Result<tokio::net::TcpListener, ServerError> {
        let socket = Socket::new(
            Domain::for_address(self.addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )
        .map_err(|e| ServerError::BindError(self.addr, e))?;

        // Allow rebinding while old sockets linger in TIME_WAIT
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        socket
            .bind(&self.addr.into())
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .listen(128)
            .map_err(|e| ServerError::BindError(self.addr, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::BindError(self.addr, e))
    }

    /// Runs the server until shutdown.
    pub async fn run(self) -> std::result::Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the server until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` completes.
    pub async fn serve<F>(
        self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> std::result::Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().unwrap_or(self.addr);
        info!("Admin API listening on {}", addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Admin API stopped");
        Ok(())
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use understudy_core::{
        MiddlewareBridge, Mode, RequestDetails, RequestResponsePair, ResponseDetails,
    };
    use understudy_proxy::{EngineConfig, ProxyEngine};
    use understudy_storage::MemoryCache;

    fn engine(config: EngineConfig) -> ProxyEngine {
        ProxyEngine::new(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
        )
        .unwrap()
    }

    fn create_test_app() -> (Router, ProxyEngine) {
        let engine = engine(EngineConfig::default());
        (router(AppState::new(engine.clone())), engine)
    }

    fn envelope() -> serde_json::Value {
        let pair = RequestResponsePair::new(
            RequestDetails::new("GET", "http", "example.com", "/users"),
            ResponseDetails::new(200, "[]"),
        );
        json!({ "data": [pair.to_view()] })
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, 8888);
        assert_eq!(config.with_port(0).port, 0);
    }

    #[test]
    fn test_server_rejects_bad_host() {
        let (_, engine) = create_test_app();
        let result = Server::new(
            ServerConfig::default().with_host("not a host"),
            AppState::new(engine),
        );
        assert!(matches!(result, Err(ServerError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = create_test_app();
        let (status, json) = send(app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_import_and_list_records() {
        let (app, engine) = create_test_app();

        let (status, json) = send(
            app.clone(),
            "POST",
            "/api/records",
            Some(envelope().to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "1 payloads import complete.");
        assert_eq!(engine.records_count().await.unwrap(), 1);

        let (status, json) = send(app.clone(), "GET", "/api/records", None).await;
        assert_eq!(status, StatusCode::OK);
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["request"]["path"], "/users");
        assert_eq!(data[0]["response"]["body"], "[]");

        let (_, json) = send(app, "GET", "/api/count", None).await;
        assert_eq!(json["count"], 1);
    }

    #[tokio::test]
    async fn test_duplicate_import_overwrites() {
        let (app, engine) = create_test_app();
        for _ in 0..2 {
            let (status, _) = send(
                app.clone(),
                "POST",
                "/api/records",
                Some(envelope().to_string()),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(engine.records_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_bad_json_is_unprocessable() {
        let (app, _) = create_test_app();
        let (status, json) =
            send(app, "POST", "/api/records", Some("{not json".to_string())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["code"], "unprocessable");
    }

    #[tokio::test]
    async fn test_import_empty_is_unprocessable() {
        let (app, _) = create_test_app();
        let (status, _) = send(
            app,
            "POST",
            "/api/records",
            Some(json!({"data": []}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_delete_records() {
        let (app, engine) = create_test_app();
        send(
            app.clone(),
            "POST",
            "/api/records",
            Some(envelope().to_string()),
        )
        .await;

        let (status, _) = send(app, "DELETE", "/api/records", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(engine.records_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_and_set_state() {
        let (app, engine) = create_test_app();

        let (status, json) = send(app.clone(), "GET", "/api/state", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "virtualize");
        assert_eq!(json["destination"], ".");

        let (status, json) = send(
            app,
            "POST",
            "/api/state",
            Some(json!({"mode": "capture", "destination": "example"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "capture");
        assert_eq!(engine.mode(), Mode::Capture);
        assert_eq!(engine.destination(), "example");
    }

    #[tokio::test]
    async fn test_unknown_mode_is_rejected() {
        let (app, engine) = create_test_app();
        let (status, json) = send(
            app,
            "POST",
            "/api/state",
            Some(json!({"mode": "teleport"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "bad_request");
        assert_eq!(engine.mode(), Mode::Virtualize);
    }

    #[tokio::test]
    async fn test_transform_modes_need_middleware() {
        let (app, engine) = create_test_app();
        let (status, _) = send(
            app,
            "POST",
            "/api/state",
            Some(json!({"mode": "synthesize", "destination": "other"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(engine.mode(), Mode::Virtualize);
        assert_eq!(engine.destination(), ".");
    }

    #[tokio::test]
    async fn test_transform_mode_with_middleware() {
        let bridge = MiddlewareBridge::from_definition("cat").unwrap();
        let engine = engine(EngineConfig::default().with_middleware(bridge));
        let app = router(AppState::new(engine.clone()));

        let (status, _) = send(
            app,
            "POST",
            "/api/state",
            Some(json!({"mode": "modify"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(engine.mode(), Mode::Modify);
    }

    #[tokio::test]
    async fn test_bad_destination_is_rejected() {
        let (app, engine) = create_test_app();
        let (status, _) = send(
            app,
            "POST",
            "/api/state",
            Some(json!({"destination": "("}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(engine.destination(), ".");
    }

    #[tokio::test]
    async fn test_stats() {
        let (app, engine) = create_test_app();
        engine.counter().count(Mode::Simulate);
        engine.counter().count(Mode::Simulate);

        let (status, json) = send(app, "GET", "/api/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stats"]["counters"]["simulate"], 2);
        assert_eq!(json["stats"]["counters"]["capture"], 0);
        assert_eq!(json["recordsCount"], 0);
    }

    #[tokio::test]
    async fn test_metadata() {
        let (app, _) = create_test_app();

        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/metadata",
            Some(json!({"key": "suite", "value": "smoke"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/metadata",
            Some(json!({"value": "orphan"}).to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, json) = send(app.clone(), "GET", "/api/metadata", None).await;
        assert_eq!(json["data"]["suite"], "smoke");

        let (status, _) = send(app.clone(), "DELETE", "/api/metadata", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = send(app, "GET", "/api/metadata", None).await;
        assert!(json["data"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_binds_and_stops() {
        let (_, engine) = create_test_app();
        let server = Server::new(ServerConfig::default().with_port(0), AppState::new(engine)).unwrap();
        let listener = server.bind().unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
