//! Core functionality shared by both services.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Metrics collection
//! - HTTP middleware
//! - Database-backed capacity storage

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;

// Re-export commonly used types
pub use config::{LoadBalancerConfig, RateLimiterConfig};
pub use database::{CapacityStore, DatabaseConfig};
pub use error::{AppError, Result};
pub use logging::{generate_request_id, init_logging};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::MetricsMiddleware;
