//! Log capture for tests.

use tracing_subscriber::EnvFilter;

/// Targets logged at `TRACE` by default.
const TARGETS: &[&str] = &["s3tester", "s3tester_core", "s3tester_cli"];

/// Installs a subscriber that writes to the output captured by the Rust test runner.
///
/// Unless `RUST_LOG` is set, only the s3tester crates are logged, with maximum verbosity. Thread
/// names are included since most tests drive connections from several threads. Calling this
/// more than once is fine.
///
/// # Example
///
/// ```
/// s3tester_test::tracing::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        TARGETS.iter().fold(EnvFilter::new("error"), |filter, target| {
            filter.add_directive(format!("{target}=trace").parse().unwrap())
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
