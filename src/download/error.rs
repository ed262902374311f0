//! Error types for the transfer engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::client::ClientError;

/// Errors that can occur while transferring a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Transport-level failure (network, timeout, non-2xx status).
    #[error(transparent)]
    Client(#[from] ClientError),

    /// File system error (create, write, hash read).
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A destination component exists but is not a directory.
    ///
    /// This is a configuration error: it is reported immediately and never
    /// retried.
    #[error("{path} exists and is not a directory")]
    NotADirectory {
        /// The conflicting path.
        path: PathBuf,
    },
}

impl DownloadError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a directory-conflict error.
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// True for errors where another attempt could succeed.
    ///
    /// Directory conflicts are configuration mistakes; retrying cannot fix
    /// them.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotADirectory { .. })
    }
}

// No blanket `From<std::io::Error>`: the variants need path context the
// source error does not carry, so the helper constructors are the interface.
