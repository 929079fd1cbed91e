//! Load balancer entry point.
//!
//! Binds a single listener that reverse-proxies every request to the next
//! healthy upstream. A background health checker takes dead upstreams out of
//! rotation and puts them back when they recover.

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use turnpike::{
    api::{forward, metrics_handler, ProxyState},
    core::{
        init_logging, init_metrics, middleware::request_id_middleware, LoadBalancerConfig,
        MetricsMiddleware,
    },
    services::{HealthChecker, Pooler, ServerPool},
};

#[derive(Parser, Debug)]
#[command(name = "loadbalancer")]
#[command(about = "Health-gated round-robin reverse proxy", long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config/loadbalancer.yaml")]
    config: String,

    /// Log verbosity (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format);
    init_metrics();

    let config = LoadBalancerConfig::load(&args.config)?;
    tracing::info!(
        upstreams = config.servers.len(),
        "Configuration loaded from {}",
        args.config
    );

    let pool: Arc<dyn Pooler> = Arc::new(ServerPool::new(&config.servers)?);
    let http_client = create_http_client();

    let checker = HealthChecker::start(
        pool.clone(),
        http_client.clone(),
        Duration::from_secs(config.health_check_interval_secs),
    );

    let state = ProxyState { pool, http_client };

    // Everything except /metrics is forwarded upstream, so backend routes are
    // never shadowed by local ones.
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .fallback(forward)
        .with_state(state)
        .layer(axum::middleware::from_fn(MetricsMiddleware::track_metrics))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting load balancer on {}", addr);
    tracing::info!("Metrics endpoint: /metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gracefully shutting down application");
    checker.stop().await;

    Ok(())
}

/// Create HTTP client with connection pooling, shared by the proxy handler
/// and the health checker.
fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .expect("Failed to build HTTP client")
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
