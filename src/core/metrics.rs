//! Prometheus metrics for monitoring the load balancer and rate limiter.
//!
//! This module provides a centralized metrics registry with various metric types
//! for tracking proxied requests, upstream health, and rate-limit decisions.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    GaugeVec, HistogramVec, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of proxied requests by method, endpoint, upstream, and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Upstream health status (1=alive, 0=dead)
    pub upstream_health: GaugeVec,

    /// Health probe round-trip latency histogram in seconds
    pub probe_duration: HistogramVec,

    /// Rate-limit admission decisions by outcome (allowed, denied, missing_key)
    pub rate_limit_decisions: IntCounterVec,

    /// Number of keys currently tracked by the token bucket
    pub tracked_keys: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// This should be called once at application startup. Subsequent calls will
/// return the same instance.
///
/// # Examples
///
/// ```no_run
/// use turnpike::core::metrics::init_metrics;
///
/// let metrics = init_metrics();
/// metrics.request_count.with_label_values(&["GET", "/", "http://backend:9001", "200"]).inc();
/// ```
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "turnpike_requests_total",
            "Total number of proxied requests",
            &["method", "endpoint", "upstream", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "turnpike_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint"],
            vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "turnpike_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_health = register_gauge_vec!(
            "turnpike_upstream_health",
            "Upstream health status (1=alive, 0=dead)",
            &["upstream"]
        )
        .expect("Failed to register upstream_health metric");

        let probe_duration = register_histogram_vec!(
            "turnpike_probe_duration_seconds",
            "Health probe round-trip latency in seconds",
            &["upstream"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
        )
        .expect("Failed to register probe_duration metric");

        let rate_limit_decisions = register_int_counter_vec!(
            "turnpike_rate_limit_decisions_total",
            "Rate-limit admission decisions by outcome",
            &["outcome"]
        )
        .expect("Failed to register rate_limit_decisions metric");

        let tracked_keys = register_int_gauge!(
            "turnpike_tracked_keys",
            "Number of keys currently tracked by the token bucket"
        )
        .expect("Failed to register tracked_keys metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_health,
            probe_duration,
            rate_limit_decisions,
            tracked_keys,
        }
    })
}

/// Get the global metrics instance.
///
/// # Panics
///
/// Panics if metrics have not been initialized via [`init_metrics`].
pub fn get_metrics() -> &'static Metrics {
    METRICS.get().expect("Metrics not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = init_metrics();

        metrics
            .request_count
            .with_label_values(&["GET", "/test", "http://backend:9001", "200"])
            .inc();

        // Verify the same instance is returned
        let metrics2 = get_metrics();
        assert!(std::ptr::eq(metrics, metrics2));
    }

    #[test]
    fn test_request_count_metric() {
        let metrics = init_metrics();

        // Use unique label values to avoid conflicts with other tests
        let labels = ["GET", "/unique-count", "http://backend:9099", "201"];
        let initial = metrics.request_count.with_label_values(&labels).get();

        metrics.request_count.with_label_values(&labels).inc();

        let after = metrics.request_count.with_label_values(&labels).get();
        assert_eq!(after, initial + 1);
    }

    #[test]
    fn test_active_requests_metric() {
        let metrics = init_metrics();

        let initial = metrics.active_requests.with_label_values(&["/app"]).get();

        metrics.active_requests.with_label_values(&["/app"]).inc();
        let after_inc = metrics.active_requests.with_label_values(&["/app"]).get();
        assert_eq!(after_inc, initial + 1.0);

        metrics.active_requests.with_label_values(&["/app"]).dec();
        let after_dec = metrics.active_requests.with_label_values(&["/app"]).get();
        assert_eq!(after_dec, initial);
    }

    #[test]
    fn test_upstream_health_metric() {
        let metrics = init_metrics();

        metrics
            .upstream_health
            .with_label_values(&["http://backend:9001"])
            .set(1.0);
        assert_eq!(
            metrics
                .upstream_health
                .with_label_values(&["http://backend:9001"])
                .get(),
            1.0
        );

        metrics
            .upstream_health
            .with_label_values(&["http://backend:9001"])
            .set(0.0);
        assert_eq!(
            metrics
                .upstream_health
                .with_label_values(&["http://backend:9001"])
                .get(),
            0.0
        );
    }

    #[test]
    fn test_rate_limit_decisions_metric() {
        let metrics = init_metrics();

        let initial = metrics
            .rate_limit_decisions
            .with_label_values(&["denied"])
            .get();

        metrics
            .rate_limit_decisions
            .with_label_values(&["denied"])
            .inc();

        let after = metrics
            .rate_limit_decisions
            .with_label_values(&["denied"])
            .get();
        assert_eq!(after, initial + 1);
    }

    #[test]
    fn test_tracked_keys_metric() {
        let metrics = init_metrics();

        metrics.tracked_keys.set(3);
        assert_eq!(metrics.tracked_keys.get(), 3);

        metrics.tracked_keys.set(0);
        assert_eq!(metrics.tracked_keys.get(), 0);
    }

    #[test]
    fn test_probe_duration_metric() {
        let metrics = init_metrics();

        metrics
            .probe_duration
            .with_label_values(&["http://backend:9001"])
            .observe(0.05);

        let metric = metrics
            .probe_duration
            .with_label_values(&["http://backend:9001"]);
        assert!(metric.get_sample_count() >= 1);
    }
}
