//! Background task that periodically closes expired, idle connections.
//!
//! The reaper wakes up on a fixed interval, reaps the [`ConnTracker`] and then asks the
//! transport to drop its own pool of idle connections. The tracker only knows about connections
//! it wrapped, so the second step catches anything else the transport still keeps around.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::tracker::ConnTracker;

/// Lower bound for the default reap interval.
pub const MIN_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// A transport that keeps a pool of idle connections for reuse.
pub trait IdleConnections: Send + Sync + 'static {
    /// Closes all connections that are currently idle in the pool.
    fn close_idle_connections(&self);
}

impl<T: IdleConnections + ?Sized> IdleConnections for Arc<T> {
    fn close_idle_connections(&self) {
        (**self).close_idle_connections()
    }
}

/// Returns the interval between reaper ticks.
///
/// An explicit non-zero `interval` is used as is. Otherwise, the interval is half the TTL, but
/// at least [`MIN_REAP_INTERVAL`].
pub fn reap_interval(ttl: Duration, interval: Option<Duration>) -> Duration {
    match interval {
        Some(interval) if !interval.is_zero() => interval,
        _ => (ttl / 2).max(MIN_REAP_INTERVAL),
    }
}

/// Handle to a running reaper task.
///
/// Dropping the handle leaves the reaper running until its parent token is cancelled.
#[derive(Debug, Default)]
pub struct ReaperHandle {
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Creates a handle that does nothing when cancelled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns `true` if a reaper task was started for this handle.
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Stops future reaper ticks.
    ///
    /// A tick that is already running completes. Connections that are in use or not yet
    /// expired are left alone.
    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    /// Cancels the reaper and waits for the task to exit.
    pub async fn shutdown(self) {
        self.cancel();
        if let Some(task) = self.task {
            if let Err(error) = task.await {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "connection reaper failed"
                );
            }
        }
    }
}

/// Spawns the connection reaper on the current tokio runtime.
///
/// On every tick, the reaper closes idle connections in `tracker` that are older than the
/// tracker's TTL and then calls [`IdleConnections::close_idle_connections`] on `transport`. Both
/// run on the blocking thread pool. The
/// first tick happens one interval after starting. The reaper stops when the returned handle or
/// `parent` is cancelled.
///
/// If `tracker` is disabled, no task is spawned and the returned handle is inert.
pub fn start_reaper<T>(
    transport: T,
    tracker: ConnTracker,
    interval: Option<Duration>,
    parent: &CancellationToken,
) -> ReaperHandle
where
    T: IdleConnections,
{
    let Some(ttl) = tracker.ttl() else {
        return ReaperHandle::disabled();
    };

    let interval = reap_interval(ttl, interval);
    let token = parent.child_token();
    tracing::info!(?ttl, ?interval, "starting connection reaper");

    let transport = Arc::new(transport);
    let task = tokio::spawn({
        let token = token.clone();
        async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // Closing sockets is blocking work, keep it off the async workers.
                let tick = tokio::task::spawn_blocking({
                    let tracker = tracker.clone();
                    let transport = Arc::clone(&transport);
                    move || {
                        let reaped = tracker.reap();
                        transport.close_idle_connections();
                        reaped
                    }
                });

                match tick.await {
                    Ok(reaped) => {
                        tracing::trace!(reaped, tracked = tracker.len(), "connection reaper tick")
                    }
                    Err(error) => tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "connection reaper tick failed"
                    ),
                }
            }

            tracing::debug!("connection reaper stopped");
        }
    });

    ReaperHandle {
        token: Some(token),
        task: Some(task),
    }
}
