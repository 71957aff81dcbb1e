//! Operation and error counters for a load-test run.
//!
//! A [`Metrics`] registry is created once per run and shared with every worker. Workers record
//! one event per finished operation; the runner takes a [`MetricsSnapshot`] at the end.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Counters {
    ops: BTreeMap<&'static str, u64>,
    errors: BTreeMap<(&'static str, String), u64>,
}

/// Counter registry for operations and their failures.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

impl Metrics {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts one executed operation of kind `op`.
    pub fn record_op(&self, op: &'static str) {
        *self.counters().ops.entry(op).or_default() += 1;
    }

    /// Counts one failed operation of kind `op`, classified by `code`.
    pub fn record_error(&self, op: &'static str, code: impl Into<String>) {
        *self.counters().errors.entry((op, code.into())).or_default() += 1;
    }

    /// Returns a copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters();
        MetricsSnapshot {
            ops: counters.ops.clone(),
            errors: counters.errors.clone(),
        }
    }
}

/// Point-in-time copy of a [`Metrics`] registry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Executed operations by kind.
    pub ops: BTreeMap<&'static str, u64>,
    /// Failed operations by kind and error code.
    pub errors: BTreeMap<(&'static str, String), u64>,
}

impl MetricsSnapshot {
    /// Total number of executed operations.
    pub fn total_ops(&self) -> u64 {
        self.ops.values().sum()
    }

    /// Total number of failed operations.
    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_ops_and_errors() {
        let metrics = Metrics::new();
        metrics.record_op("head");
        metrics.record_op("head");
        metrics.record_error("head", "404");
        metrics.record_error("head", "404");
        metrics.record_error("head", "io");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ops["head"], 2);
        assert_eq!(snapshot.errors[&("head", "404".to_owned())], 2);
        assert_eq!(snapshot.errors[&("head", "io".to_owned())], 1);
        assert_eq!(snapshot.total_ops(), 2);
        assert_eq!(snapshot.total_errors(), 3);
    }

    #[test]
    fn snapshot_is_detached() {
        let metrics = Metrics::new();
        let before = metrics.snapshot();
        metrics.record_op("head");

        assert_eq!(before, MetricsSnapshot::default());
        assert_eq!(metrics.snapshot().total_ops(), 1);
    }
}
