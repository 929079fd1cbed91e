//! Turnpike - a health-gated round-robin load balancer and token-bucket rate limiter
//!
//! This library backs two binaries that share a common core:
//!
//! - **Load balancer**: a streaming reverse proxy that spreads requests over a
//!   pool of upstream servers in round-robin order, skipping servers a
//!   background health checker has marked dead
//! - **Rate limiter**: an HTTP service that admits or rejects requests per
//!   API key using token buckets, with per-key capacities stored in Postgres
//!   and refreshed on a refill cycle
//!
//! # Architecture
//!
//! The codebase is organized into three main layers:
//!
//! - [`core`]: Core functionality (config, database, errors, metrics, middleware)
//! - [`api`]: HTTP handlers for the proxy and the capacity admin API
//! - [`services`]: Business logic (server pool, health checker, token buckets)
//!
//! # Configuration
//!
//! Both binaries read a YAML config file (`--config`) with `${VAR}`
//! placeholders expanded from the environment. The rate limiter additionally
//! requires `DATABASE_USER`, `DATABASE_HOST` and `DATABASE_NAME` (plus
//! `DATABASE_PASSWORD`/`DATABASE_PORT` as needed) for the capacity store.

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{admin_router, forward, CapacityWriter, ProxyState};
pub use core::{
    AppError, CapacityStore, DatabaseConfig, LoadBalancerConfig, RateLimiterConfig, Result,
};
pub use services::{Bucket, CapacityProvider, HealthChecker, Pooler, ServerPool};
