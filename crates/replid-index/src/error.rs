//! Snapshot walk errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving or walking a directory tree.
///
/// A walk error is fatal to that walk: a partial or truncated snapshot is
/// never returned.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The requested path does not exist under the serving root.
    #[error("path not found: {0}")]
    NotFound(String),

    /// The requested path is empty or tries to escape the serving root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Reading a directory or file failed mid-walk.
    #[error("filesystem error at {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
