//! "Last seen" liveness heartbeat for a worker's fetch loop.
//!
//! Ported from the original `ReadinessProbe().update_last_seen()` call
//! at the top of each service's fetch loop: the loop touches a shared
//! timestamp on every iteration (whether or not a message was actually
//! delivered), and [`HeartbeatDependency`] folds that timestamp into
//! the same [`super::Dependency`] feed the broker/store checks use, so
//! a wedged loop — one that stopped iterating without crashing — shows
//! up in `/health` the same way a disconnected broker would.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use super::{Dependency, DependencyStatus};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// A shared, cheaply-cloneable "I'm still iterating" timestamp.
#[derive(Clone)]
pub struct Heartbeat {
    last_seen: Arc<AtomicU64>,
}

impl Heartbeat {
    /// Creates a heartbeat stamped with the current time.
    pub fn new() -> Self {
        Self {
            last_seen: Arc::new(AtomicU64::new(now_secs())),
        }
    }

    /// Records that the loop made progress just now. Call this once per
    /// fetch-loop iteration, regardless of whether it yielded a message.
    pub fn touch(&self) {
        self.last_seen.store(now_secs(), Ordering::Relaxed);
    }

    /// Seconds since the last [`Heartbeat::touch`].
    pub fn age(&self) -> Duration {
        let last = self.last_seen.load(Ordering::Relaxed);
        Duration::from_secs(now_secs().saturating_sub(last))
    }

    /// Wraps this heartbeat as a [`Dependency`] that reports unhealthy
    /// once `max_staleness` has elapsed since the last touch.
    pub fn dependency(&self, name: impl Into<String>, max_staleness: Duration) -> HeartbeatDependency {
        HeartbeatDependency {
            name: name.into(),
            heartbeat: self.clone(),
            max_staleness,
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Dependency`] view of a [`Heartbeat`], suitable for
/// `SimpleHealthCheck::add_dependency`.
pub struct HeartbeatDependency {
    name: String,
    heartbeat: Heartbeat,
    max_staleness: Duration,
}

impl Dependency for HeartbeatDependency {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = DependencyStatus> + Send + '_>> {
        let age = self.heartbeat.age();
        let max_staleness = self.max_staleness;
        Box::pin(async move {
            if age <= max_staleness {
                DependencyStatus::Healthy
            } else {
                DependencyStatus::Unhealthy(format!(
                    "fetch loop has not progressed in {}s (max {}s)",
                    age.as_secs(),
                    max_staleness.as_secs()
                ))
            }
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }
}
