//! Key set fixtures and failure overrides.
//!
//! Key sets are JSON arrays of [`LockKey`]s. A built-in set ships with the
//! binary and is used when no file is given.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use keyring_core::{CommandResultCode, LockKey, UnknownResultCode};
use thiserror::Error;

/// Key set used when no fixture file is given.
pub const BUILTIN_KEYS: &str = include_str!("../fixtures/locks.json");

/// Errors from loading fixtures or parsing overrides.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// Fixture file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Fixture is not a valid key set.
    #[error("invalid key fixture: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failure override is not `<lock-id>=<result-code>`.
    #[error("invalid failure override {0:?}, expected <lock-id>=<result-code>")]
    Override(String),

    /// Failure override names an unknown result code.
    #[error(transparent)]
    UnknownCode(#[from] UnknownResultCode),
}

/// Parse a JSON key set.
pub fn parse_keys(json: &str) -> Result<Vec<LockKey>, FixtureError> {
    Ok(serde_json::from_str(json)?)
}

/// Load the key set at `path`, or the built-in set.
pub fn load_keys(path: Option<&Path>) -> Result<Vec<LockKey>, FixtureError> {
    let Some(path) = path else {
        return parse_keys(BUILTIN_KEYS);
    };

    let json = fs::read_to_string(path)
        .map_err(|source| FixtureError::Io { path: path.to_path_buf(), source })?;
    parse_keys(&json)
}

/// Parse a `<lock-id>=<result-code>` override, e.g. `lock-front=unauthorized`.
pub fn parse_failure(s: &str) -> Result<(String, CommandResultCode), FixtureError> {
    let Some((lock_id, code)) = s.split_once('=') else {
        return Err(FixtureError::Override(s.to_string()));
    };
    let lock_id = lock_id.trim();
    if lock_id.is_empty() {
        return Err(FixtureError::Override(s.to_string()));
    }

    Ok((lock_id.to_string(), code.trim().parse()?))
}
