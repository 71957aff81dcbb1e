//! A pooling TCP transport whose connections are tracked for reaping.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use s3tester_core::{ConnTracker, IdleConnections, TrackedConn};

/// A connection checked out of the [`Transport`].
pub type Conn = TrackedConn<TcpStream>;

/// Dials connections to a single endpoint and keeps idle ones around for reuse.
///
/// Every dialed stream is wrapped in a [`TrackedConn`] registered with the transport's
/// [`ConnTracker`], so the reaper can close connections that outlived their TTL.
#[derive(Debug)]
pub struct Transport {
    addr: String,
    tracker: ConnTracker,
    max_idle: usize,
    connect_timeout: Duration,
    io_timeout: Duration,
    idle: Mutex<Vec<Conn>>,
}

impl Transport {
    /// Creates a transport for the endpoint at `addr` (`host:port`).
    ///
    /// Reads and writes on dialed connections fail after `io_timeout` without progress.
    pub fn new(
        addr: impl Into<String>,
        tracker: ConnTracker,
        max_idle: usize,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            tracker,
            max_idle,
            connect_timeout,
            io_timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Returns the endpoint address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Conn>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of pooled idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    /// Returns an open connection, reusing an idle one if possible.
    pub fn checkout(&self) -> io::Result<Conn> {
        loop {
            let Some(conn) = self.idle().pop() else {
                break;
            };
            // The reaper may have closed it while it was sitting in the pool.
            if !conn.is_closed() {
                return Ok(conn);
            }
        }

        self.dial()
    }

    /// Returns a connection to the idle pool.
    ///
    /// Closed connections and connections beyond the pool capacity are dropped.
    pub fn checkin(&self, conn: Conn) {
        if conn.is_closed() {
            return;
        }

        let mut idle = self.idle();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn dial(&self) -> io::Result<Conn> {
        let mut last_error = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(self.io_timeout))?;
                    stream.set_write_timeout(Some(self.io_timeout))?;
                    let conn = TrackedConn::new(&self.tracker, stream);
                    tracing::trace!(conn = conn.id(), %addr, "dialed connection");
                    return Ok(conn);
                }
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {}", self.addr),
            )
        }))
    }
}

impl IdleConnections for Transport {
    fn close_idle_connections(&self) {
        let idle = std::mem::take(&mut *self.idle());
        for conn in idle {
            if let Err(error) = conn.close() {
                tracing::debug!(
                    error = &error as &dyn std::error::Error,
                    conn = conn.id(),
                    "failed to close idle connection"
                );
            }
        }
    }
}
