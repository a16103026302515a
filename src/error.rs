//! Error types for logqbit-migrate
//!
//! Per-run errors (`MalformedSource`, `UnreadableSource`, `WriteFailed`) are
//! collected by the migration driver into its report. Only `RootUnavailable`
//! aborts a job.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Migration error types
#[derive(Error, Debug)]
pub enum Error {
    /// Source run (or session index) exists but cannot be parsed
    #[error("Malformed source {}: {reason}", path.display())]
    MalformedSource {
        /// Offending source file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Filesystem-level failure while reading a source file
    #[error("Unreadable source {}: {source}", path.display())]
    UnreadableSource {
        /// Source file that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Publishing a target run failed; the staging area was discarded
    #[error("Write failed for {}: {reason}", path.display())]
    WriteFailed {
        /// Target run directory (or artifact) being written
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Reading back a converted run (Parquet/Arrow) or scanning the target tree failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Source root missing or target root not writable (fatal)
    #[error("Root unavailable {}: {reason}\nNothing was converted; fix the root path and rerun", path.display())]
    RootUnavailable {
        /// Root directory
        path: PathBuf,
        /// Why it cannot be used
        reason: String,
    },
}

impl Error {
    /// Build a `MalformedSource` error
    pub fn malformed(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::MalformedSource {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Build an `UnreadableSource` error
    pub fn unreadable(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::UnreadableSource {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build a `WriteFailed` error from any displayable cause
    pub fn write_failed(path: impl AsRef<Path>, reason: impl std::fmt::Display) -> Self {
        Self::WriteFailed {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Build a `RootUnavailable` error
    pub fn root_unavailable(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::RootUnavailable {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether this error terminates the whole job
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RootUnavailable { .. })
    }

    /// Short stable name of the error kind, used in reports and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSource { .. } => "malformed_source",
            Self::UnreadableSource { .. } => "unreadable_source",
            Self::WriteFailed { .. } => "write_failed",
            Self::StorageError(_) => "storage",
            Self::RootUnavailable { .. } => "root_unavailable",
        }
    }
}
