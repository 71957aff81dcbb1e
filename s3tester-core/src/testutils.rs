//! A scriptable in-memory [`Connection`] for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::conn::Connection;

#[derive(Default)]
struct State {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    reads: usize,
    closes: usize,
    fail_io: Option<io::ErrorKind>,
    fail_close: bool,
    block_reads: bool,
    block_writes: bool,
    parked: bool,
    shut_down: bool,
}

impl State {
    fn is_gated(&self, write: bool) -> bool {
        let gated = if write {
            self.block_writes
        } else {
            self.block_reads
        };
        gated && !self.shut_down
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Parks the calling operation while its gate is closed and the stream is not shut down.
    fn pass_gate<'a>(&'a self, mut state: MutexGuard<'a, State>, write: bool) -> MutexGuard<'a, State> {
        if !state.is_gated(write) {
            return state;
        }

        state.parked = true;
        self.changed.notify_all();
        let mut state = self
            .changed
            .wait_while(state, |state| state.is_gated(write))
            .unwrap();
        state.parked = false;
        state
    }
}

/// In-memory stream that records how it was used.
pub(crate) struct MockStream {
    inner: Arc<Inner>,
}

/// Observes and steers a [`MockStream`] after it has been handed to a
/// [`TrackedConn`](crate::TrackedConn).
pub(crate) struct MockMonitor {
    inner: Arc<Inner>,
}

impl MockStream {
    pub fn new() -> (Self, MockMonitor) {
        let inner = Arc::new(Inner::default());
        let monitor = MockMonitor {
            inner: Arc::clone(&inner),
        };
        (Self { inner }, monitor)
    }

    /// Queues bytes to be returned by subsequent reads.
    pub fn push_read(&self, bytes: &[u8]) {
        self.inner.state().incoming.extend(bytes);
    }

    /// Makes every read and write fail with the given error kind.
    pub fn fail_io(&self, kind: io::ErrorKind) {
        self.inner.state().fail_io = Some(kind);
    }

    /// Makes closing the stream fail.
    pub fn fail_close(&self) {
        self.inner.state().fail_close = true;
    }

    /// Parks reads until [`MockMonitor::release`] or until the stream is shut down.
    pub fn block_reads(&self) {
        self.inner.state().block_reads = true;
    }

    /// Parks writes and flushes until [`MockMonitor::release`] or until the stream is shut down.
    pub fn block_writes(&self) {
        self.inner.state().block_writes = true;
    }
}

impl Connection for MockStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.inner.state();
        state.reads += 1;
        let mut state = self.inner.pass_gate(state, false);

        if state.shut_down {
            return Ok(0);
        }
        if let Some(kind) = state.fail_io {
            return Err(kind.into());
        }

        let len = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.pass_gate(self.inner.state(), true);

        if state.shut_down {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if let Some(kind) = state.fail_io {
            return Err(kind.into());
        }

        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&self) -> io::Result<()> {
        let state = self.inner.pass_gate(self.inner.state(), true);
        if state.shut_down {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        let mut state = self.inner.state();
        state.closes += 1;
        state.shut_down = true;
        self.inner.changed.notify_all();

        if state.fail_close {
            return Err(io::Error::other("close failed"));
        }
        Ok(())
    }
}

impl MockMonitor {
    pub fn reads(&self) -> usize {
        self.inner.state().reads
    }

    pub fn closes(&self) -> usize {
        self.inner.state().closes
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.state().written.clone()
    }

    /// Waits until a read, write or flush is parked on its gate.
    pub fn wait_parked(&self) {
        let state = self.inner.state();
        drop(
            self.inner
                .changed
                .wait_while(state, |state| !state.parked)
                .unwrap(),
        );
    }

    /// Opens all gates.
    pub fn release(&self) {
        let mut state = self.inner.state();
        state.block_reads = false;
        state.block_writes = false;
        self.inner.changed.notify_all();
    }
}
