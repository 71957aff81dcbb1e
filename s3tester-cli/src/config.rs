//! Configuration for the s3tester load generator.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `S3T__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `S3T__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `S3T__ENDPOINT=127.0.0.1:9000` sets the target endpoint
//! - `S3T__CONN_TTL=30s` enables connection reaping after 30 seconds
//! - `S3T__LOGGING__LEVEL=debug` sets the log level
//!
//! # YAML Configuration File
//!
//! ```yaml
//! endpoint: 127.0.0.1:9000
//! bucket: load
//! key_file: keys.txt
//! mode: random
//! concurrency: 32
//! duration: 1m
//! conn_ttl: 30s
//! ```

use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use s3tester_core::SelectionMode;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "S3T__";

/// Main configuration struct for the load generator.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Address of the object storage endpoint as `host:port`.
    ///
    /// # Default
    ///
    /// `127.0.0.1:9000`
    ///
    /// # Environment Variable
    ///
    /// `S3T__ENDPOINT`
    pub endpoint: String,

    /// Bucket that keys are looked up in.
    ///
    /// # Default
    ///
    /// `s3tester`
    pub bucket: String,

    /// Path to a newline-delimited file with the object keys to request.
    ///
    /// Blank lines are ignored. The file must contain at least one key.
    ///
    /// # Default
    ///
    /// `keys.txt`
    pub key_file: PathBuf,

    /// How workers pick keys from the key file: `roundrobin` or `random`.
    ///
    /// Unknown values fall back to `roundrobin`.
    ///
    /// # Default
    ///
    /// `roundrobin`
    #[serde(with = "selection_mode")]
    pub mode: SelectionMode,

    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// The number of available CPU cores.
    pub concurrency: usize,

    /// How long to generate load for.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Maximum age of an idle connection before it is closed.
    ///
    /// Connections in the middle of a request are never closed. A value of `0s` disables
    /// connection reaping.
    ///
    /// # Default
    ///
    /// `0s` (disabled)
    #[serde(with = "humantime_serde")]
    pub conn_ttl: Duration,

    /// Interval between reaper runs.
    ///
    /// # Default
    ///
    /// Half of `conn_ttl`, but at least one second.
    #[serde(default, with = "humantime_serde")]
    pub reap_interval: Option<Duration>,

    /// Maximum number of idle connections kept for reuse.
    ///
    /// # Default
    ///
    /// `64`
    pub max_idle_connections: usize,

    /// Timeout for establishing a new connection.
    ///
    /// # Default
    ///
    /// `5s`
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single read or write on an established connection.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:9000".into(),
            bucket: "s3tester".into(),
            key_file: PathBuf::from("keys.txt"),
            mode: SelectionMode::RoundRobin,
            concurrency: available_parallelism().map_or(1, |n| n.get()),
            duration: Duration::from_secs(10),
            conn_ttl: Duration::ZERO,
            reap_interval: None,
            max_idle_connections: 64,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(30),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `S3T__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable overrides this if set.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `S3T__LOGGING__LEVEL`
    #[serde(with = "level_filter")]
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
        }
    }
}

/// Serde adapter for [`SelectionMode`]. Unknown names fall back to round-robin.
mod selection_mode {
    use s3tester_core::SelectionMode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(mode: &SelectionMode, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(mode.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SelectionMode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        let Ok(mode) = name.parse::<SelectionMode>();
        Ok(mode)
    }
}

/// Serde adapter for a [`LevelFilter`] given by name, such as `debug` or `off`.
mod level_filter {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use tracing::level_filters::LevelFilter;

    pub fn serialize<S>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(level)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| D::Error::custom(format!("invalid log level `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.endpoint, "127.0.0.1:9000");
            assert_eq!(config.mode, SelectionMode::RoundRobin);
            assert_eq!(config.conn_ttl, Duration::ZERO);
            assert_eq!(config.reap_interval, None);
            assert_eq!(config.logging.level, LevelFilter::INFO);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("S3T__ENDPOINT", "storage:8080");
            jail.set_env("S3T__MODE", "random");
            jail.set_env("S3T__CONCURRENCY", "12");
            jail.set_env("S3T__CONN_TTL", "30s");
            jail.set_env("S3T__REAP_INTERVAL", "5s");
            jail.set_env("S3T__LOGGING__LEVEL", "debug");

            let config = Config::load(None).unwrap();

            assert_eq!(config.endpoint, "storage:8080");
            assert_eq!(config.mode, SelectionMode::Random);
            assert_eq!(config.concurrency, 12);
            assert_eq!(config.conn_ttl, Duration::from_secs(30));
            assert_eq!(config.reap_interval, Some(Duration::from_secs(5)));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            endpoint: localhost:9000
            bucket: load
            key_file: /tmp/keys.txt
            mode: random
            duration: 1m
            conn_ttl: 90s
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.endpoint, "localhost:9000");
            assert_eq!(config.bucket, "load");
            assert_eq!(config.key_file, PathBuf::from("/tmp/keys.txt"));
            assert_eq!(config.mode, SelectionMode::Random);
            assert_eq!(config.duration, Duration::from_secs(60));
            assert_eq!(config.conn_ttl, Duration::from_secs(90));

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            endpoint: localhost:9000
            mode: random
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("S3T__MODE", "roundrobin");

            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.endpoint, "localhost:9000");
            // Env should overwrite the yaml config
            assert_eq!(config.mode, SelectionMode::RoundRobin);

            Ok(())
        });
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("S3T__LOGGING__LEVEL", "chatty");

            let err = Config::load(None).unwrap_err();
            assert!(format!("{err:#}").contains("chatty"));

            Ok(())
        });
    }

    #[test]
    fn unknown_mode_falls_back_to_round_robin() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("S3T__MODE", "zipfian");

            let config = Config::load(None).unwrap();
            assert_eq!(config.mode, SelectionMode::RoundRobin);

            Ok(())
        });
    }
}
