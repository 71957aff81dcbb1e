//! Command line interface of the `s3tester` binary.

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::{observability, runner};

/// Load generator for object storage services.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Version(VersionCommand),
}

/// run the load test
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// path to the key file, overriding the configuration
    #[argh(option, short = 'k')]
    keys: Option<PathBuf>,
}

/// print the s3tester version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let RunCommand { keys } = match args.command {
        Command::Run(run) => run,
        Command::Version(_) => {
            println!("s3tester {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
    };

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(keys) = keys {
        config.key_file = keys;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        // Every worker occupies a blocking thread for the whole run.
        .max_blocking_threads(config.concurrency.max(512))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let summary = runtime.block_on(runner::run(config))?;
    runner::print_summary(&summary);

    Ok(())
}
