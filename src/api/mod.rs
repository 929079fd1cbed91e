//! API layer for the load balancer and rate limiter services.
//!
//! This module contains the reverse proxy handler, the capacity admin
//! endpoints, and the handlers both services share.

pub mod admin;
pub mod handlers;
pub mod proxy;

// Re-export commonly used types
pub use admin::{admin_router, set_capacity, CapacityWriter, SetCapacityRequest};
pub use handlers::{health, metrics_handler};
pub use proxy::{forward, ProxyState};
