//! Flash-sale Error Hierarchy
//!
//! Infrastructure failures are errors. Expected outcomes of the purchase
//! path (rejections, lock contention, deferred fulfillment) are modelled as
//! plain return values by the components that produce them.

use std::path::PathBuf;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shared key/value store failures (unreachable, script errors)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Backing relational store failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Cache envelope (de)serialization failures
    #[error("Cache payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Loader failures reported by callers of the cache client
    #[error("Loader for {key} failed: {reason}")]
    Loader { key: String, reason: String },

    /// Retry policy exhaustion
    #[error("Gave up on {operation} after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: usize,
    },

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to send shutdown signal: {0}")]
    SignalSenderClosed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The shared store could not be reached
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    /// Operation against a key holding the wrong kind of value
    #[error("WRONGTYPE operation against key {key} holding {found}")]
    WrongType { key: String, found: &'static str },

    /// Counter key holds something that is not an integer
    #[error("Value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("Invalid stream id: {0}")]
    InvalidStreamId(String),

    #[error("No such consumer group {group} for stream {stream}")]
    NoGroup { stream: String, group: String },

    /// Server-side scripted evaluation failed
    #[error("Script {script} failed: {reason}")]
    Script {
        script: &'static str,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization failures for persisted records
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Transaction could not be committed
    #[error("Transaction aborted: {0}")]
    Transaction(String),

    /// Checksum or decoding failures of stored rows
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::DbError(e.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(e.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Storage(e.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.into())
    }
}
