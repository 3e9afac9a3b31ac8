//! Error types for the metadata multitool.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for multitool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during multitool operations.
///
/// Infrastructure failures (bad root, corrupt log, worker pool) abort the
/// current command. Per-file failures are rendered into strings by the batch
/// executor and never escape it.
#[derive(Debug, Error)]
pub enum Error {
    /// Root or target path is missing, of the wrong type, or inaccessible.
    #[error("invalid path '{}': {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },
    /// The operation log could not be read, parsed or written.
    #[error(transparent)]
    Log(#[from] LogError),
    /// The worker pool could not be built or fed.
    #[error("batch processing failed: {reason}")]
    BatchProcessing {
        reason: String,
        #[source]
        source: io::Error,
    },
    /// Invalid argument value (filter expressions and the like).
    #[error("invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: String, reason: String },
    /// The label mapping CSV could not be used.
    #[error("invalid label mapping '{}': {reason}", path.display())]
    Mapping { path: PathBuf, reason: String },
    /// The metadata backend failed for one file.
    #[error(transparent)]
    Transformer(#[from] TransformerError),
    /// No metadata backend is installed but the command needs one.
    #[error("exiftool was not found; install it or set `exiftool_path` in .mm_config.yaml")]
    TransformerUnavailable,
    /// I/O error with path context.
    #[error("I/O error for '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The tracing subscriber could not be installed.
    #[error("failed to initialise logging: {reason}")]
    Logging { reason: String },
}

/// Failures of the per-directory operation log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to read log file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse log file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize log data: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write log file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The log changed on disk between load and persist.
    #[error("log file '{}' was modified by another process; re-run the command", path.display())]
    Conflict { path: PathBuf },
}

/// Failures reported by a [`MetadataTransformer`](crate::transformer::MetadataTransformer).
#[derive(Debug, Error)]
pub enum TransformerError {
    #[error("failed to launch '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("exiftool exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("unexpected exiftool output: {reason}")]
    Output { reason: String },
    #[error("metadata backend does not support {operation}")]
    Unsupported { operation: &'static str },
}

impl Error {
    /// Create an I/O error with path context.
    pub fn io_with_path(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            argument: argument.into(),
            reason: reason.into(),
        }
    }
}
