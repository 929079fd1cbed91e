//! Periodic liveness probing that drives pool health flips.
//!
//! The checker runs one probe cycle immediately at startup and then on a
//! fixed interval. Each cycle probes every configured upstream in parallel,
//! waits for the whole fan-out, and applies the results to the pool. One
//! slow upstream therefore delays a cycle but never blocks probing of the
//! others, and cycles never overlap.

use crate::core::metrics::get_metrics;
use crate::services::pool::Pooler;
use reqwest::Client;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{oneshot, watch};
use tokio::time::{timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Per-probe timeout; a probe still pending after this counts as dead.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Background health checker for a [`Pooler`].
///
/// Created with [`HealthChecker::start`], which spawns the probe loop; call
/// [`HealthChecker::stop`] once at shutdown.
pub struct HealthChecker {
    cancel_tx: watch::Sender<bool>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl HealthChecker {
    /// Spawn the probe loop. The first cycle runs right away so a dead
    /// upstream is taken out of rotation before the first interval elapses.
    pub fn start(pool: Arc<dyn Pooler>, client: Client, check_interval: Duration) -> Self {
        Self::with_probe_timeout(pool, client, check_interval, DEFAULT_PROBE_TIMEOUT)
    }

    /// [`HealthChecker::start`] with a custom per-probe timeout.
    pub fn with_probe_timeout(
        pool: Arc<dyn Pooler>,
        client: Client,
        check_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            // interval fires immediately on the first tick
            let mut interval = tokio::time::interval(check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        Self::check_all(pool.as_ref(), &client, probe_timeout).await;
                    }
                    _ = cancel_rx.changed() => {
                        // Cancellation is cooperative: a cycle in flight
                        // finishes before the loop sees the signal.
                        if *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("health check task exiting");
            let _ = done_tx.send(());
        });

        Self {
            cancel_tx,
            done_rx: Mutex::new(Some(done_rx)),
        }
    }

    /// One probe cycle: fan out over every configured upstream, wait for all
    /// probes, then apply flips. Logs fire only on an actual state change.
    async fn check_all(pool: &dyn Pooler, client: &Client, probe_timeout: Duration) {
        let upstreams = pool.get_all();

        let mut tasks = Vec::with_capacity(upstreams.len());
        for upstream in upstreams {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let alive = Self::probe(&client, &upstream, probe_timeout).await;
                (upstream, alive)
            }));
        }

        let results = futures::future::join_all(tasks).await;

        for result in results {
            match result {
                Ok((upstream, true)) => {
                    if pool.enable(&upstream) {
                        info!(upstream = %upstream, "upstream is alive");
                    }
                    get_metrics()
                        .upstream_health
                        .with_label_values(&[&upstream])
                        .set(1.0);
                }
                Ok((upstream, false)) => {
                    if pool.disable(&upstream) {
                        warn!(upstream = %upstream, "upstream is dead");
                    }
                    get_metrics()
                        .upstream_health
                        .with_label_values(&[&upstream])
                        .set(0.0);
                }
                Err(e) => {
                    warn!(error = %e, "probe task failed");
                }
            }
        }
    }

    /// Probe one upstream with a plain GET to its base address. Transport
    /// errors, timeouts, and 5xx responses count as dead; anything else,
    /// including 4xx, counts as alive.
    async fn probe(client: &Client, upstream: &str, probe_timeout: Duration) -> bool {
        let start = Instant::now();
        let result = timeout(probe_timeout, client.get(upstream).send()).await;

        get_metrics()
            .probe_duration
            .with_label_values(&[upstream])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_server_error() {
                    debug!(upstream = %upstream, status = %status, "probe returned server error");
                    false
                } else {
                    true
                }
            }
            Ok(Err(e)) => {
                debug!(upstream = %upstream, error = %e, "probe failed");
                false
            }
            Err(_) => {
                debug!(
                    upstream = %upstream,
                    timeout_ms = probe_timeout.as_millis() as u64,
                    "probe timed out"
                );
                false
            }
        }
    }

    /// Stop the probe loop and wait for it to exit. Call once at shutdown;
    /// later calls are no-ops.
    pub async fn stop(&self) {
        let _ = self.cancel_tx.send(true);

        let done_rx = self
            .done_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(done_rx) = done_rx {
            match tokio::time::timeout(STOP_TIMEOUT, done_rx).await {
                Ok(_) => debug!("health checker stopped"),
                Err(_) => warn!("timed out waiting for health check task to stop"),
            }
        }
    }
}
