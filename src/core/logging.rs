//! Logging setup for the load balancer and rate limiter binaries.
//!
//! Installs a tracing subscriber with an env-filter and either a text or
//! JSON formatter, and provides request-id generation for request tracking.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a configured log level string onto a tracing filter directive.
///
/// Returns `None` for values tracing does not know about.
fn normalize_level(log_level: &str) -> Option<&'static str> {
    match log_level.to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Noisy HTTP library
/// logs (hyper, h2, reqwest) are always capped at warn, because a bare
/// `RUST_LOG=debug` would otherwise drown the output in connection logs.
///
/// Unknown level or format values fall back to `info` / `text` with a
/// warning rather than failing startup.
pub fn init_logging(log_level: &str, log_format: &str) {
    let level = normalize_level(log_level);
    let effective = level.unwrap_or("info");

    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| effective.to_string());
    let filter_str = format!("{},hyper=warn,h2=warn,reqwest=warn", base_filter);
    let filter = EnvFilter::new(filter_str);

    let json = log_format.eq_ignore_ascii_case("json");
    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }

    if level.is_none() {
        tracing::warn!(value = %log_level, "Unknown log level, falling back to info");
    }
    if !json && !log_format.eq_ignore_ascii_case("text") {
        tracing::warn!(value = %log_format, "Unknown log format, falling back to text");
    }
}

/// Generate a new unique request ID using UUID v4.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
