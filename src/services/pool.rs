//! Health-gated round-robin selection over a fixed set of upstream servers.
//!
//! The pool owns an ordered list of upstream addresses fixed at construction
//! and a mutable health flag per address. Selection rotates over the alive
//! subset only; the health checker drives flips via [`Pooler::enable`] and
//! [`Pooler::disable`].

use crate::core::error::{AppError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

/// Capability for upstream selection and health administration.
///
/// Split out as a trait so the proxy handler and the health checker can be
/// exercised against in-memory fakes.
pub trait Pooler: Send + Sync {
    /// Return the next alive upstream in rotation order.
    fn get(&self) -> Result<String>;

    /// Return every configured upstream, alive or dead, in configured order.
    fn get_all(&self) -> Vec<String>;

    /// Mark an upstream alive. Returns true iff it was dead before this call;
    /// unknown addresses are ignored and return false.
    fn enable(&self, server: &str) -> bool;

    /// Mark an upstream dead. Returns true iff it was alive before this call;
    /// unknown addresses are ignored and return false.
    fn disable(&self, server: &str) -> bool;
}

/// Mutable pool state. Health flags, the alive count, and the rotation
/// cursor must change together, so they live behind one lock.
struct PoolState {
    healthy: HashMap<String, bool>,
    cursor: usize,
    alive: usize,
}

/// Round-robin pool over a fixed upstream list.
pub struct ServerPool {
    /// Rotation order; never changes after construction.
    upstreams: Vec<String>,
    state: Mutex<PoolState>,
}

impl ServerPool {
    /// Build a pool from upstream addresses, all starting alive.
    ///
    /// Fails on the first address that does not parse as a URL; no partial
    /// pool is ever constructed.
    pub fn new(servers: &[String]) -> Result<Self> {
        let mut upstreams = Vec::with_capacity(servers.len());
        let mut healthy = HashMap::with_capacity(servers.len());

        for server in servers {
            Url::parse(server).map_err(|_| AppError::InvalidUpstream(server.clone()))?;
            upstreams.push(server.clone());
            healthy.insert(server.clone(), true);
        }

        let alive = upstreams.len();
        Ok(Self {
            upstreams,
            state: Mutex::new(PoolState {
                healthy,
                cursor: 0,
                alive,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Pooler for ServerPool {
    /// The cursor indexes the alive subsequence, not the full list: walk the
    /// configured order counting alive entries and return the one whose
    /// alive-ordinal matches. Disabling a server shifts later ordinals down
    /// without any renumbering.
    fn get(&self) -> Result<String> {
        let mut state = self.lock();

        if state.cursor >= state.alive {
            state.cursor = 0;
        }

        let mut alive_idx = 0;
        for upstream in &self.upstreams {
            if !state.healthy.get(upstream).copied().unwrap_or(false) {
                continue;
            }
            if alive_idx == state.cursor {
                state.cursor += 1;
                return Ok(upstream.clone());
            }
            alive_idx += 1;
        }

        Err(AppError::NoAvailableServer)
    }

    fn get_all(&self) -> Vec<String> {
        self.upstreams.clone()
    }

    fn enable(&self, server: &str) -> bool {
        let mut state = self.lock();

        let flipped = match state.healthy.get_mut(server) {
            Some(flag) => {
                let flipped = !*flag;
                *flag = true;
                flipped
            }
            None => return false,
        };

        if flipped {
            state.alive += 1;
        }
        flipped
    }

    fn disable(&self, server: &str) -> bool {
        let mut state = self.lock();

        let flipped = match state.healthy.get_mut(server) {
            Some(flag) => {
                let flipped = *flag;
                *flag = false;
                flipped
            }
            None => return false,
        };

        if flipped {
            state.alive -= 1;
        }
        flipped
    }
}
