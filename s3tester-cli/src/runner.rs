//! Run workers concurrently against the object store and print metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use s3tester_core::{
    ConnTracker, IdleConnections, KeySupply, Metrics, MetricsSnapshot, SelectionMode,
    start_reaper,
};
use tokio_util::sync::CancellationToken;
use yansi::Paint;

use crate::config::Config;
use crate::http;
use crate::transport::Transport;

/// Operation name used for metrics.
const OP_HEAD: &str = "head";

/// Pause after a failed dial before trying again.
const DIAL_BACKOFF: Duration = Duration::from_millis(10);

/// The outcome of a load-test run.
#[derive(Debug)]
pub struct Summary {
    /// Selection mode used by the workers.
    pub mode: SelectionMode,
    /// Number of workers.
    pub concurrency: usize,
    /// Number of keys in the corpus.
    pub keys: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Final operation and error counters.
    pub metrics: MetricsSnapshot,
}

/// Runs the load test described by `config` until its duration elapsed or Ctrl-C is pressed.
///
/// Every worker repeatedly draws a key, checks out a connection and issues a `HEAD` request for
/// that key. Idle connections older than the configured TTL are closed in the background.
pub async fn run(config: Config) -> Result<Summary> {
    let keys = KeySupply::from_file(&config.key_file).context("failed to load key file")?;
    let keys = Arc::new(keys);

    let tracker = ConnTracker::new(config.conn_ttl);
    let transport = Arc::new(Transport::new(
        config.endpoint.clone(),
        tracker.clone(),
        config.max_idle_connections,
        config.connect_timeout,
        config.io_timeout,
    ));
    let metrics = Arc::new(Metrics::new());

    let shutdown = CancellationToken::new();
    let reaper = start_reaper(
        Arc::clone(&transport),
        tracker.clone(),
        config.reap_interval,
        &shutdown,
    );

    let concurrency = config.concurrency.max(1);
    tracing::info!(
        endpoint = %config.endpoint,
        mode = %config.mode,
        concurrency,
        duration = ?config.duration,
        "starting load test"
    );

    let start = Instant::now();
    let workers: Vec<_> = (0..concurrency)
        .map(|id| {
            let worker = Worker {
                id: id as u64,
                mode: config.mode,
                bucket: config.bucket.clone(),
                keys: Arc::clone(&keys),
                transport: Arc::clone(&transport),
                metrics: Arc::clone(&metrics),
                shutdown: shutdown.clone(),
            };
            tokio::task::spawn_blocking(move || worker.run())
        })
        .collect();

    tokio::select! {
        _ = tokio::time::sleep(config.duration) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, stopping workers"),
    }
    shutdown.cancel();

    for worker in workers {
        worker.await.context("worker failed")?;
    }
    let elapsed = start.elapsed();

    reaper.shutdown().await;
    transport.close_idle_connections();
    tracing::debug!(tracked = tracker.len(), "load test finished");

    Ok(Summary {
        mode: config.mode,
        concurrency,
        keys: keys.len(),
        elapsed,
        metrics: metrics.snapshot(),
    })
}

/// A single load-generating worker, running on a blocking thread.
struct Worker {
    id: u64,
    mode: SelectionMode,
    bucket: String,
    keys: Arc<KeySupply>,
    transport: Arc<Transport>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl Worker {
    fn run(self) {
        while !self.shutdown.is_cancelled() {
            let key = match self.keys.next(self.mode, self.id) {
                Ok(key) => key,
                Err(error) => {
                    tracing::error!(error = &error as &dyn std::error::Error, "no key to request");
                    self.metrics.record_error(OP_HEAD, "keys");
                    continue;
                }
            };

            let mut conn = match self.transport.checkout() {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::debug!(
                        error = &error as &dyn std::error::Error,
                        worker = self.id,
                        "failed to connect"
                    );
                    self.metrics.record_error(OP_HEAD, "connect");
                    std::thread::sleep(DIAL_BACKOFF);
                    continue;
                }
            };

            let result = http::head_object(&mut conn, self.transport.addr(), &self.bucket, key);
            self.metrics.record_op(OP_HEAD);
            match result {
                Ok(response) => {
                    if !response.is_success() {
                        self.metrics
                            .record_error(OP_HEAD, response.status.to_string());
                    }
                    if !response.close {
                        self.transport.checkin(conn);
                    }
                }
                Err(error) => {
                    tracing::debug!(
                        error = &error as &dyn std::error::Error,
                        worker = self.id,
                        key,
                        "request failed"
                    );
                    self.metrics.record_error(OP_HEAD, "io");
                }
            }
        }
    }
}

/// Prints a human-readable summary of the run to stdout.
pub fn print_summary(summary: &Summary) {
    let metrics = &summary.metrics;

    println!();
    println!(
        "{} (mode: {}, concurrency: {}, keys: {})",
        "## s3tester".bold(),
        summary.mode.blue(),
        summary.concurrency.bold(),
        summary.keys.bold()
    );

    for (op, count) in &metrics.ops {
        let failures: u64 = metrics
            .errors
            .iter()
            .filter(|((error_op, _), _)| error_op == op)
            .map(|(_, count)| count)
            .sum();

        print!(
            "{} ({} ops",
            format!("{}:", op.to_uppercase()).bold().green(),
            count.bold()
        );
        if failures > 0 {
            print!(", {}", format!("{failures} FAILURES").bold().red());
        }
        println!(")");

        let ops_ps = *count as f64 / summary.elapsed.as_secs_f64();
        println!("  {:.2} operations/s", ops_ps.bold());
    }

    // Only dial failures, which do not count as operations.
    if metrics.ops.is_empty() && metrics.total_errors() > 0 {
        println!(
            "{}",
            format!("{} FAILURES", metrics.total_errors()).bold().red()
        );
    }

    for ((op, code), count) in &metrics.errors {
        println!("  {op} {}: {count}", code.red());
    }
}
