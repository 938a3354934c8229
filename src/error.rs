//! Error types for attachment-transfer
//!
//! The taxonomy follows the lifecycle of an upload:
//! - build-time failures abort before any session exists ([`BuildError`])
//! - transport and status failures come back from a finished transfer
//! - timeouts are computed locally and never reported by the transfer backend
//! - finalization failures are raised while completing a transfer ([`FinalizeError`])

use crate::types::TaskId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for attachment-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for attachment-transfer
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.temp_dir")
        key: Option<String>,
    },

    /// The outbound request could not be built; nothing was started or persisted
    #[error("failed to build upload request: {0}")]
    Build(#[from] BuildError),

    /// The transfer failed at the network level
    #[error("transfer failed: {0}")]
    Transport(String),

    /// The server answered with a status outside the accepted set
    #[error("unacceptable status code {code}")]
    UnacceptableStatus {
        /// HTTP status code returned by the server
        code: u16,
    },

    /// The transfer did not finish within the timeout for its size
    #[error("upload task {task_id} timed out")]
    TimedOut {
        /// Task that was given up on
        task_id: TaskId,
    },

    /// Completing a transferred upload failed
    #[error("finalization failed: {0}")]
    Finalize(#[from] FinalizeError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Shutdown in progress - not accepting new uploads
    #[error("shutdown in progress: not accepting new uploads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came back from the transfer itself (as opposed to
    /// local bookkeeping)
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::UnacceptableStatus { .. } | Error::TimedOut { .. }
        )
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be decoded
    #[error("corrupt value for {key}: {reason}")]
    CorruptValue {
        /// Logical key of the stored value
        key: String,
        /// Decoder message
        reason: String,
    },
}

/// Failures while preparing an upload request
#[derive(Debug, Error)]
pub enum BuildError {
    /// The streamable copy could not be created or written
    #[error("cannot write temporary file {path}: {source}")]
    TempFile {
        /// Path of the temporary file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The caller's source file could not be read
    #[error("cannot read source file {path}: {source}")]
    SourceFile {
        /// Path of the source file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Form fields could not be encoded
    #[error("cannot encode form data: {0}")]
    FormEncoding(String),

    /// The produced request failed structural validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failures while completing a transferred upload
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The server rejected the item metadata update
    #[error("can't submit item {key}")]
    CantSubmitItem {
        /// Attachment key
        key: String,
    },

    /// The response carried no `Last-Modified-Version`
    #[error("response is missing a Last-Modified-Version header")]
    MissingVersion,

    /// The local store write failed
    #[error("local store write failed: {0}")]
    Store(String),
}
