use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or drawing keys.
#[derive(Debug, Error)]
pub enum Error {
    /// The key file could not be opened or read.
    #[error("failed to read key file {}", path.display())]
    KeyFile {
        /// Path of the key file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        cause: std::io::Error,
    },

    /// The key file contained no usable keys after skipping blank lines.
    #[error("no keys loaded from {}", path.display())]
    NoKeys {
        /// Path of the key file.
        path: PathBuf,
    },

    /// An in-memory key list contained no usable keys.
    #[error("key list is empty")]
    EmptyKeyList,

    /// No key could be drawn because the corpus is empty.
    #[error("no keys available")]
    Exhausted,
}

impl Error {
    /// Returns `true` for errors caused by invalid configuration.
    ///
    /// These are fatal at startup and never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::KeyFile { .. } | Self::NoKeys { .. } | Self::EmptyKeyList
        )
    }
}

/// Result type for key supply operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
