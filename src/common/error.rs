//! Common error types for the output pipeline
//!
//! # Design Principles (KISS)
//! - Provide common error variants used by buffers, sinks and writers
//! - Nothing here is fatal to a run: callers log and continue
//! - Use thiserror for ergonomic error handling

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while moving records to disk
///
/// Every variant is "best effort, log and continue": the recording facade
/// never propagates these across thread boundaries.
#[derive(Error, Debug)]
pub enum OutputError {
    /// Destination file could not be opened for writing
    #[error("Cannot open output file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Write or flush failed after the file was opened
    #[error("Failed writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Buffer has no destination configured (worker buffers never flush)
    #[error("Buffer has no output path configured")]
    NoOutputPath,

    /// JSON serialization error (manifest)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OutputError {
    /// Create an open error for `path`
    pub fn open(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a write error for `path`
    pub fn write(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Result type alias using OutputError
pub type OutputResult<T> = Result<T, OutputError>;
