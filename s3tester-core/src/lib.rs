//! Work distribution and connection lifecycle for the s3tester load generator.
//!
//! Workers draw object keys from a shared [`KeySupply`] and perform their I/O over
//! [`TrackedConn`]s. Every tracked connection is registered with a [`ConnTracker`], and a
//! background reaper started with [`start_reaper`] periodically closes connections that are idle
//! and older than the configured TTL.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod conn;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod reaper;
pub mod tracker;

#[cfg(test)]
mod testutils;

pub use conn::{ConnHandle, Connection, TrackedConn};
pub use error::{Error, Result};
pub use keys::{KeySupply, SelectionMode};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reaper::{IdleConnections, ReaperHandle, start_reaper};
pub use tracker::ConnTracker;
