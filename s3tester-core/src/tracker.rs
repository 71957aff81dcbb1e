//! Registry of tracked connections with TTL-based reaping.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::conn::Lifecycle;

struct TrackerInner {
    ttl: Duration,
    conns: Mutex<HashMap<u64, Weak<dyn Lifecycle>>>,
}

impl TrackerInner {
    fn conns(&self) -> MutexGuard<'_, HashMap<u64, Weak<dyn Lifecycle>>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps back-references to live connections so that expired, idle ones can be closed.
///
/// A tracker with a zero TTL is disabled: registration, removal and reaping are all no-ops.
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct ConnTracker {
    inner: Option<Arc<TrackerInner>>,
}

impl ConnTracker {
    /// Creates a tracker that reaps idle connections older than `ttl`.
    ///
    /// Returns a disabled tracker if `ttl` is zero.
    pub fn new(ttl: Duration) -> Self {
        if ttl.is_zero() {
            return Self::disabled();
        }

        Self {
            inner: Some(Arc::new(TrackerInner {
                ttl,
                conns: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// Creates a tracker that does not track anything.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Returns `true` if this tracker registers connections.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// The connection time-to-live, or `None` for a disabled tracker.
    pub fn ttl(&self) -> Option<Duration> {
        self.inner.as_ref().map(|inner| inner.ttl)
    }

    /// Returns the number of currently registered connections.
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.conns().len())
    }

    /// Returns `true` if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn add(&self, id: u64, conn: Weak<dyn Lifecycle>) {
        if let Some(inner) = &self.inner {
            inner.conns().insert(id, conn);
        }
    }

    pub(crate) fn remove(&self, id: u64) {
        if let Some(inner) = &self.inner {
            inner.conns().remove(&id);
        }
    }

    /// Closes every registered connection that is idle and at least `ttl` old.
    ///
    /// Connections that are in the middle of a read or write are never reaped, regardless of
    /// their age. Expired connections are removed from the registry under the lock and closed
    /// after releasing it. A failure to close one connection does not stop the others from
    /// being closed.
    ///
    /// Returns the number of reaped connections.
    pub fn reap(&self) -> usize {
        let Some(inner) = &self.inner else {
            return 0;
        };

        let mut expired = Vec::new();
        inner.conns().retain(|_, conn| match conn.upgrade() {
            // The owner dropped the connection without it being closed yet.
            None => false,
            Some(conn) if conn.age() >= inner.ttl && !conn.in_use() => {
                expired.push(conn);
                false
            }
            Some(_) => true,
        });

        for conn in &expired {
            if let Err(error) = conn.close() {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    conn = conn.id(),
                    "failed to close expired connection"
                );
            }
        }

        if !expired.is_empty() {
            tracing::debug!(reaped = expired.len(), "reaped expired connections");
        }
        expired.len()
    }
}

impl fmt::Debug for ConnTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnTracker")
            .field("ttl", &self.ttl())
            .field("len", &self.len())
            .finish()
    }
}
