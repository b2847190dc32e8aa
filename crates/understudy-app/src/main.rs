//! Understudy - record, replay and rewrite HTTP(S) traffic.
//!
//! This is the main binary that runs:
//! - The intercepting proxy (default port 8500)
//! - The admin API (default port 8888)

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use understudy_app::{open_caches, Args};
use understudy_proxy::{CaManager, ProxyConfig, ProxyEngine, ProxyServer};
use understudy_server::{AppState, Server, ServerConfig};

const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Initialize logging, optionally with daily file rotation.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("understudy={},warn", args.log_level())));

    if let Some(log_dir) = args.log_dir.as_deref() {
        match file_appender(log_dir) {
            Ok(appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
            Err(e) => {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
                tracing::warn!("File logging unavailable ({}), using console only", e);
                return None;
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

fn file_appender(log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)?;
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix("understudy")
        .filename_suffix("log")
        .build(log_dir)?)
}

fn ca_manager(args: &Args) -> anyhow::Result<CaManager> {
    let manager = match &args.ca_dir {
        Some(dir) => CaManager::new(dir),
        None => CaManager::with_default_dir().context("Failed to locate CA directory")?,
    };
    Ok(manager
        .with_subject(args.cert_name.clone(), args.cert_org.clone())
        .with_algorithm(args.key_algorithm))
}

fn spawn_metrics(engine: ProxyEngine) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::info!("Counters: {:?}", engine.counter().snapshot());
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Keep guard alive for the duration of the program
    let _log_guard = init_logging(&args);

    tracing::info!("Starting Understudy...");
    tracing::debug!("Args: {:?}", args);

    let engine_config = args.engine_config().context("Invalid configuration")?;
    let proxy_addr = args.proxy_addr().context("Invalid configuration")?;

    let caches = open_caches(&args).context("Failed to open cache")?;
    let engine = ProxyEngine::new(engine_config, caches.requests, caches.metadata)
        .context("Invalid configuration")?;
    if let Some(middleware) = engine.middleware() {
        tracing::info!("Using middleware {}", middleware.transform_definition());
    }

    for location in &args.imports {
        let imported = engine
            .import(location)
            .await
            .with_context(|| format!("Failed to import {}", location))?;
        tracing::info!("Imported {} records from {}", imported, location);
    }

    let proxy_config = ProxyConfig::new(ca_manager(&args)?)
        .with_addr(proxy_addr)
        .with_regenerate_ca(args.generate_ca_cert);
    let proxy = ProxyServer::new(proxy_config, engine.clone())
        .context("Failed to prepare root certificate authority")?;
    tracing::info!("Root certificate at {:?}", proxy.ca_cert_path());

    let admin = Server::new(
        ServerConfig::default()
            .with_host(args.host.clone())
            .with_port(args.admin_port),
        AppState::new(engine.clone()),
    )
    .context("Invalid admin API configuration")?;
    let admin_listener = admin.bind().context("Failed to bind admin API")?;

    let proxy_handle = proxy.start().await.context("Failed to start proxy")?;

    if args.metrics {
        spawn_metrics(engine.clone());
    }

    tracing::info!(
        "Understudy running in {} mode (proxy {}, admin {})",
        engine.mode(),
        proxy_handle.addr(),
        admin.addr()
    );

    let (admin_stop_tx, admin_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut admin_task = tokio::spawn(admin.serve(admin_listener, async move {
        let _ = admin_stop_rx.await;
    }));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
        }
        result = &mut admin_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("Admin API stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!("Admin API error: {}", e),
                Err(e) => tracing::error!("Admin API task failed: {}", e),
            }
        }
    }

    proxy_handle.stop().await;
    let _ = admin_stop_tx.send(());
    if !admin_task.is_finished() {
        let _ = admin_task.await;
    }

    tracing::info!(
        "Understudy shutting down after {} requests",
        engine.counter().total()
    );
    Ok(())
}
