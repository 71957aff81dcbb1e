//! Logging setup for the `s3tester` binary.

use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::Config;

/// Crates whose events pass the default filter at every level.
const CRATES: &[&str] = &["s3tester", "s3tester_cli", "s3tester_core"];

/// Installs the global `tracing` subscriber, logging to stderr.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &Config) {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
    let (level, env_filter) = log_filters(config.logging.level, rust_log.as_deref());

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Resolves the output level and the per-target filter.
///
/// A `rust_log` that is a bare level replaces `configured`, and dependencies stay at `INFO`.
/// Anything else is taken as a list of filter directives and applied as is.
fn log_filters(configured: LevelFilter, rust_log: Option<&str>) -> (LevelFilter, EnvFilter) {
    let level = match rust_log {
        None => configured,
        Some(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
    };

    let directives = CRATES
        .iter()
        .map(|name| format!("{name}=trace"))
        .fold(String::from("info"), |acc, directive| acc + "," + &directive);

    (level, EnvFilter::new(directives))
}
