//! Business logic services for the load balancer and rate limiter.
//!
//! This module contains the long-lived components behind both binaries:
//! upstream selection, admission control, and background health checking.

pub mod bucket;
pub mod health;
pub mod pool;

// Re-export commonly used types
pub use bucket::{Bucket, CapacityProvider};
pub use health::HealthChecker;
pub use pool::{Pooler, ServerPool};
