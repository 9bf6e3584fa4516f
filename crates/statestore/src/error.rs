//! Error types for the statestore crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record payload could not be encoded or decoded
    #[error("record payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Store file location is unusable
    #[error("invalid store path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// A write request is malformed (e.g. an upsert without data)
    #[error("invalid write for {device}/{category}: {message}")]
    InvalidWrite {
        device: String,
        category: String,
        message: String,
    },
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;
