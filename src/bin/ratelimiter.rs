//! Rate limiter entry point.
//!
//! Binds two listeners: the application port, where every request passes
//! through token-bucket admission control keyed on `X-API-Key`, and the
//! token port, where operators assign per-token capacities that are stored
//! in Postgres and picked up on the next refill cycle.

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use turnpike::{
    api::{admin_router, metrics_handler, CapacityWriter},
    core::{
        init_logging, init_metrics,
        middleware::{rate_limit_middleware, request_id_middleware},
        CapacityStore, DatabaseConfig, MetricsMiddleware, RateLimiterConfig,
    },
    services::{Bucket, CapacityProvider},
};

#[derive(Parser, Debug)]
#[command(name = "ratelimiter")]
#[command(about = "Token-bucket rate limiter with database-backed capacities", long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config/ratelimiter.yaml")]
    config: String,

    /// Log verbosity (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

/// Placeholder application endpoint sitting behind the rate limiter.
async fn hello() -> &'static str {
    "hello"
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);
    init_metrics();

    let config = RateLimiterConfig::load(&args.config)?;
    tracing::info!("Configuration loaded from {}", args.config);

    let db_config = DatabaseConfig::from_env()?;
    tracing::info!("Connecting to database...");
    let store = CapacityStore::connect(&db_config).await?;
    store.check_schema().await?;
    tracing::info!("Database connected successfully");

    let provider: Arc<dyn CapacityProvider> = Arc::new(store.clone());
    let bucket = Arc::new(Bucket::new(
        provider,
        config.default_capacity,
        Duration::from_secs(config.refill_interval_secs),
    ));

    // Capacity management listener
    let writer: Arc<dyn CapacityWriter> = Arc::new(store);
    let admin_app = admin_router(writer)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    // Rate-limited application listener; /metrics stays outside admission
    // control so scrapes never consume tokens.
    let limited = Router::new()
        .route("/", get(hello))
        .layer(axum::middleware::from_fn_with_state(
            bucket.clone(),
            rate_limit_middleware,
        ));
    let app = Router::new()
        .merge(limited)
        .route("/metrics", get(metrics_handler))
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    let app_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let admin_addr = SocketAddr::from(([0, 0, 0, 0], config.token_port));
    tracing::info!("Starting rate limiter on {}", app_addr);
    tracing::info!("Capacity admin API on {}", admin_addr);

    let app_listener = tokio::net::TcpListener::bind(app_addr).await?;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;

    // Both listeners share one shutdown trigger
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut app_rx = shutdown_rx.clone();
    let mut admin_rx = shutdown_rx;
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let app_server = axum::serve(app_listener, app).with_graceful_shutdown(async move {
        let _ = app_rx.changed().await;
    });
    let admin_server = axum::serve(admin_listener, admin_app).with_graceful_shutdown(async move {
        let _ = admin_rx.changed().await;
    });

    tokio::try_join!(app_server, admin_server)?;

    tracing::info!("Gracefully shutting down application");
    bucket.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to register SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
