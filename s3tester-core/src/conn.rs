//! Lifecycle tracking for raw network connections.
//!
//! [`TrackedConn`] owns a raw [`Connection`] and records when it was created and whether a read
//! or write is currently in progress. A [`ConnTracker`] keeps a non-owning back-reference to every
//! tracked connection so that expired, idle connections can be reaped.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::tracker::ConnTracker;

/// Source of connection identities.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A raw bidirectional byte stream that is safe to use from several threads at once.
///
/// All operations take `&self` so that one thread can shut the stream down while another one is
/// blocked reading from or writing to it.
pub trait Connection: Send + Sync + 'static {
    /// Pulls some bytes from the stream into `buf`, like [`Read::read`].
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes a buffer into the stream, like [`Write::write`].
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Flushes buffered output, like [`Write::flush`].
    fn flush(&self) -> io::Result<()>;

    /// Shuts down both halves of the stream.
    ///
    /// A read or write blocked on another thread returns promptly afterwards.
    fn shutdown(&self) -> io::Result<()>;
}

/// Implements [`Connection`] for socket types whose shared references are [`Read`] + [`Write`].
macro_rules! socket_connection {
    ($ty:ty) => {
        impl Connection for $ty {
            fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
                Read::read(&mut &*self, buf)
            }

            fn write(&self, buf: &[u8]) -> io::Result<usize> {
                Write::write(&mut &*self, buf)
            }

            fn flush(&self) -> io::Result<()> {
                Write::flush(&mut &*self)
            }

            fn shutdown(&self) -> io::Result<()> {
                match <$ty>::shutdown(self, Shutdown::Both) {
                    // The peer already went away.
                    Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
                    result => result,
                }
            }
        }
    };
}

socket_connection!(TcpStream);
socket_connection!(UnixStream);

/// Type-erased view of a tracked connection, used by the tracker and by [`ConnHandle`].
pub(crate) trait Lifecycle: Send + Sync {
    fn id(&self) -> u64;
    fn age(&self) -> Duration;
    fn in_use(&self) -> bool;
    fn is_closed(&self) -> bool;
    fn close(&self) -> io::Result<()>;
}

struct Shared<S> {
    id: u64,
    created: Instant,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    tracker: ConnTracker,
    stream: S,
}

impl<S: Connection> Shared<S> {
    fn begin_io(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(&self.in_flight)
    }

    /// Runs `f` on the inner stream while the connection is marked in flight.
    ///
    /// No lock is held while `f` runs, so [`Lifecycle::close`] never waits for a transfer.
    fn with_stream<T>(&self, f: impl FnOnce(&S) -> io::Result<T>) -> io::Result<T> {
        let _guard = self.begin_io();
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ));
        }
        f(&self.stream)
    }
}

impl<S: Connection> Lifecycle for Shared<S> {
    fn id(&self) -> u64 {
        self.id
    }

    fn age(&self) -> Duration {
        self.created.elapsed()
    }

    fn in_use(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> io::Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        self.tracker.remove(self.id);
        self.stream.shutdown()
    }
}

/// Marks a connection as in flight for as long as it is alive.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A raw connection wrapped with lifecycle bookkeeping.
///
/// Every [`Read`] and [`Write`] call marks the connection as in use for its duration, so the
/// reaper never closes a connection in the middle of a transfer. An explicit [`close`] on the
/// other hand shuts the stream down immediately and interrupts a blocked transfer. Dropping a
/// `TrackedConn` closes the inner stream and removes it from its tracker.
///
/// [`close`]: TrackedConn::close
pub struct TrackedConn<S: Connection> {
    shared: Arc<Shared<S>>,
}

impl<S: Connection> TrackedConn<S> {
    /// Wraps `stream` and registers it with `tracker`.
    ///
    /// Registration is skipped if the tracker is disabled.
    pub fn new(tracker: &ConnTracker, stream: S) -> Self {
        let shared = Arc::new(Shared {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            created: Instant::now(),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            tracker: tracker.clone(),
            stream,
        });

        if tracker.is_enabled() {
            let erased: Arc<dyn Lifecycle> = shared.clone();
            tracker.add(shared.id, Arc::downgrade(&erased));
        }

        Self { shared }
    }

    /// Returns the identity of this connection.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Time elapsed since the connection was wrapped.
    pub fn age(&self) -> Duration {
        self.shared.age()
    }

    /// Returns `true` while a read or write is in progress.
    pub fn in_use(&self) -> bool {
        self.shared.in_use()
    }

    /// Returns `true` once the connection has been closed, either explicitly or by the reaper.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the connection.
    ///
    /// The first call removes the connection from its tracker and shuts down the inner stream,
    /// returning the result of that shutdown. Every subsequent call is a no-op returning `Ok(())`.
    /// A read or write blocked on another handle of this connection is interrupted, not awaited.
    pub fn close(&self) -> io::Result<()> {
        self.shared.close()
    }

    /// Returns a cloneable handle to observe this connection from other threads.
    pub fn handle(&self) -> ConnHandle {
        ConnHandle(Arc::clone(&self.shared) as Arc<dyn Lifecycle>)
    }
}

impl<S: Connection> Read for TrackedConn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.shared.with_stream(|stream| stream.read(buf))
    }
}

impl<S: Connection> Write for TrackedConn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.with_stream(|stream| stream.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared.with_stream(|stream| stream.flush())
    }
}

impl<S: Connection> Drop for TrackedConn<S> {
    fn drop(&mut self) {
        if let Err(error) = self.shared.close() {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                conn = self.shared.id,
                "failed to close dropped connection"
            );
        }
    }
}

impl<S: Connection> fmt::Debug for TrackedConn<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedConn")
            .field("id", &self.shared.id)
            .field("age", &self.age())
            .field("in_use", &self.in_use())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A shared, observe-only view of a [`TrackedConn`].
#[derive(Clone)]
pub struct ConnHandle(Arc<dyn Lifecycle>);

impl ConnHandle {
    /// Returns the identity of the connection.
    pub fn id(&self) -> u64 {
        self.0.id()
    }

    /// Time elapsed since the connection was wrapped.
    pub fn age(&self) -> Duration {
        self.0.age()
    }

    /// Returns `true` while a read or write is in progress.
    pub fn in_use(&self) -> bool {
        self.0.in_use()
    }

    /// Returns `true` once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("id", &self.id())
            .field("in_use", &self.in_use())
            .field("closed", &self.is_closed())
            .finish()
    }
}
