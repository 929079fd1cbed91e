//! Per-key token-bucket rate limiting with a fixed-window refill.
//!
//! Each key tracks a remaining counter and a last-access timestamp. A
//! background task periodically evicts idle keys and resets the survivors to
//! their current capacity. Capacity overrides come from a
//! [`CapacityProvider`]; a failing provider falls back to the default
//! capacity and never aborts admission or refill.

use crate::core::error::Result;
use crate::core::metrics::get_metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Idle keys older than this are dropped on the next refill pass.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

/// How long `stop` waits for the refill task to acknowledge shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a per-key capacity override.
///
/// Implementations are expected to be network- or storage-backed, so the
/// bucket never calls this while holding its lock.
#[async_trait]
pub trait CapacityProvider: Send + Sync {
    async fn get_capacity(&self, key: &str) -> Result<u32>;
}

struct Entry {
    remaining: u32,
    last_access: Instant,
}

/// State and queries shared between foreground `take` calls and the
/// background refill task.
struct BucketInner {
    entries: Mutex<HashMap<String, Entry>>,
    provider: Arc<dyn CapacityProvider>,
    default_capacity: u32,
    idle_ttl: Duration,
}

impl BucketInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit when tokens remain. The timestamp moves only on admission;
    /// denied calls leave the entry untouched.
    fn consume(entry: &mut Entry) -> bool {
        if entry.remaining > 0 {
            entry.remaining -= 1;
            entry.last_access = Instant::now();
            true
        } else {
            false
        }
    }

    async fn capacity_for(&self, key: &str) -> u32 {
        match self.provider.get_capacity(key).await {
            Ok(capacity) => capacity,
            Err(e) => {
                warn!(key = %key, error = %e, "capacity lookup failed, using default");
                self.default_capacity
            }
        }
    }

    async fn take(&self, key: &str) -> bool {
        {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(key) {
                return Self::consume(entry);
            }
        }

        // Unseen key: resolve its capacity with the lock released.
        let capacity = self.capacity_for(key).await;

        let mut entries = self.lock();
        // A racing take may have initialized the key while the provider
        // call was in flight; its entry wins.
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            remaining: capacity,
            last_access: Instant::now(),
        });
        Self::consume(entry)
    }

    /// One refill pass: drop idle keys, then reset every survivor to its
    /// current capacity. A hard reset, not an additive top-up; consumed
    /// tokens before the tick do not carry over.
    async fn refill_once(&self) {
        let keys: Vec<String> = {
            let mut entries = self.lock();
            entries.retain(|_, entry| entry.last_access.elapsed() <= self.idle_ttl);
            entries.keys().cloned().collect()
        };

        // Provider calls happen with the lock released.
        let mut capacities = Vec::with_capacity(keys.len());
        for key in keys {
            let capacity = self.capacity_for(&key).await;
            capacities.push((key, capacity));
        }

        let mut entries = self.lock();
        for (key, capacity) in capacities {
            // Skip keys evicted or otherwise gone since the snapshot
            if let Some(entry) = entries.get_mut(&key) {
                entry.remaining = capacity;
            }
        }
        get_metrics().tracked_keys.set(entries.len() as i64);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Token-bucket rate limiter with a background refill task.
///
/// Created with [`Bucket::new`], which spawns the refill task; call
/// [`Bucket::stop`] once at shutdown to halt it.
pub struct Bucket {
    inner: Arc<BucketInner>,
    cancel_tx: watch::Sender<bool>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Bucket {
    /// Create a bucket and start its refill timer. The first refill pass
    /// runs one full interval after creation.
    pub fn new(
        provider: Arc<dyn CapacityProvider>,
        default_capacity: u32,
        refill_interval: Duration,
    ) -> Self {
        Self::with_idle_ttl(provider, default_capacity, refill_interval, DEFAULT_IDLE_TTL)
    }

    /// [`Bucket::new`] with a custom idle TTL.
    pub fn with_idle_ttl(
        provider: Arc<dyn CapacityProvider>,
        default_capacity: u32,
        refill_interval: Duration,
        idle_ttl: Duration,
    ) -> Self {
        let inner = Arc::new(BucketInner {
            entries: Mutex::new(HashMap::new()),
            provider,
            default_capacity,
            idle_ttl,
        });

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();

        let task_inner = inner.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + refill_interval;
            let mut interval = tokio::time::interval_at(start, refill_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        task_inner.refill_once().await;
                    }
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("refill task exiting");
            let _ = done_tx.send(());
        });

        Self {
            inner,
            cancel_tx,
            done_rx: Mutex::new(Some(done_rx)),
        }
    }

    /// Admission check for `key`: lazily initialize its entry (provider
    /// override, default capacity on failure), then decrement if tokens
    /// remain. Returns whether the request is admitted.
    pub async fn take(&self, key: &str) -> bool {
        self.inner.take(key).await
    }

    /// Run one refill pass immediately, outside the timer.
    pub async fn refill_once(&self) {
        self.inner.refill_once().await;
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the refill task and wait for it to exit. Call once at shutdown;
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
                Ok(_) => debug!("rate limiter stopped"),
                Err(_) => warn!("timed out waiting for refill task to stop"),
            }
        }
    }
}
