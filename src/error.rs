//! Error types for the cache stores
//!
//! Provides unified error handling using thiserror, plus the error log every
//! store keeps so failures never reach the caller's control flow.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

// == Cache Error Enum ==
/// Unified error type for the cache stores.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache root cannot be created or resolved
    #[error("Can't create cache directory {path}: {reason}")]
    Directory { path: PathBuf, reason: String },

    /// Temp file write (or its commit) failed
    #[error("Can't write data in file {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    /// Existing file unreadable or holding a corrupt envelope
    #[error("Can't read cache file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// Value shape not supported by the codec
    #[error("Encode error: {0}")]
    Encode(String),

    /// Stored bytes do not match the codec
    #[error("Decode error: {0}")]
    Decode(String),

    /// Remote store unreachable or not connected
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote store rejected a write
    #[error("Set error: {0}")]
    Set(String),
}

impl CacheError {
    pub(crate) fn directory(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        CacheError::Directory {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        CacheError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        CacheError::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache stores.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Callback invoked with every captured error.
pub type ErrorObserver = Box<dyn Fn(&CacheError) + Send + Sync>;

// == Error Log ==
/// Accumulates the failures a store swallowed on behalf of its caller.
#[derive(Default)]
pub struct ErrorLog {
    errors: Vec<CacheError>,
    observer: Option<ErrorObserver>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures an error: logs it, hands it to the observer, keeps it.
    pub fn record(&mut self, error: CacheError) {
        warn!(error = %error, "cache operation failed");
        if let Some(observer) = &self.observer {
            observer(&error);
        }
        self.errors.push(error);
    }

    pub fn set_observer(&mut self, observer: Option<ErrorObserver>) {
        self.observer = observer;
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn as_slice(&self) -> &[CacheError] {
        &self.errors
    }

    /// Forgets every recorded error. The observer stays installed.
    pub fn clear(&mut self) {
        self.errors.clear();
    }
}

impl fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLog")
            .field("errors", &self.errors)
            .field("observer", &self.observer.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
