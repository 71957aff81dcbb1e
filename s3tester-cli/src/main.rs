//! The s3tester binary.
//!
//! See [`s3tester_cli`] for the library driving the load test.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    s3tester_cli::cli::execute()
}
