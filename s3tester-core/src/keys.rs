//! Thread-safe selection of object keys from a fixed corpus.
//!
//! The [`KeySupply`] loads a newline-delimited key file once at startup and hands out keys to
//! any number of workers. Selection is serialized by a single mutex, so round-robin selection
//! dispenses keys in strict cyclic order no matter which worker observes which key.

use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// Policy used by [`KeySupply::next`] to pick the next key.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SelectionMode {
    /// Walk the corpus in order, wrapping around at the end.
    #[default]
    RoundRobin,
    /// Draw a uniformly random key on every call.
    Random,
}

impl SelectionMode {
    /// Returns the canonical name of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "roundrobin",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionMode {
    type Err = Infallible;

    /// Parses a mode name. Unrecognized names select [`SelectionMode::RoundRobin`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "roundrobin" => Self::RoundRobin,
            "random" => Self::Random,
            other => {
                tracing::warn!(mode = other, "unknown key selection mode, using roundrobin");
                Self::RoundRobin
            }
        })
    }
}

/// Mutable selection state, guarded by the supply's mutex.
#[derive(Debug)]
struct Cursor {
    next: u64,
    rng: SmallRng,
}

/// Hands out keys from an immutable corpus under a selectable [`SelectionMode`].
#[derive(Debug)]
pub struct KeySupply {
    keys: Vec<String>,
    cursor: Mutex<Cursor>,
}

impl KeySupply {
    /// Loads the corpus from a newline-delimited file.
    ///
    /// Blank lines are skipped. Returns a configuration error if the file cannot be read or
    /// contains no keys.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|cause| Error::KeyFile {
            path: path.to_owned(),
            cause,
        })?;

        let keys = contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        let supply = Self::new(keys).map_err(|_| Error::NoKeys {
            path: path.to_owned(),
        })?;

        tracing::info!(path = %path.display(), keys = supply.len(), "loaded key corpus");
        Ok(supply)
    }

    /// Creates a supply from an in-memory list of keys, skipping empty entries.
    pub fn new(mut keys: Vec<String>) -> Result<Self> {
        keys.retain(|key| !key.is_empty());
        if keys.is_empty() {
            return Err(Error::EmptyKeyList);
        }

        Ok(Self {
            keys,
            cursor: Mutex::new(Cursor {
                next: 0,
                rng: SmallRng::seed_from_u64(wall_clock_seed()),
            }),
        })
    }

    /// Returns the next key according to `mode`.
    ///
    /// `thread_id` identifies the calling worker for diagnostics only; it does not influence
    /// which key is selected.
    pub fn next(&self, mode: SelectionMode, thread_id: u64) -> Result<&str> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let len = self.keys.len();
        if len == 0 {
            return Err(Error::Exhausted);
        }

        let index = match mode {
            SelectionMode::RoundRobin => {
                let index = (cursor.next % len as u64) as usize;
                cursor.next = cursor.next.wrapping_add(1);
                index
            }
            SelectionMode::Random => cursor.rng.random_range(0..len),
        };

        tracing::trace!(thread_id, index, "selected key");
        Ok(&self.keys[index])
    }

    /// Returns the number of keys in the corpus.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always `false` for a successfully constructed supply.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}
