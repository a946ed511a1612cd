//! Error types for dbwarden

use thiserror::Error;

/// Message carried by every fail-fast rejection while no live connection exists.
pub const NOT_CONNECTED_MESSAGE: &str = "DB.query aborted, not connected yet";

/// Core error type for dbwarden operations
///
/// Variants carry rendered messages rather than source errors so that a single
/// runtime handle error can be cloned out to every query waiting on that handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WardenError {
    /// The driver could not establish a connection
    #[error("Connect error: {0}")]
    Connect(String),

    /// An already established handle reported an error
    #[error("Connection error: {0}")]
    RuntimeHandle(String),

    /// A query was issued while no live connection exists
    #[error("{}", NOT_CONNECTED_MESSAGE)]
    NotConnected,

    /// The query call could not be submitted to the handle
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// The server rejected or failed the statement
    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::Io(err.to_string())
    }
}

/// Result type alias for dbwarden operations
pub type Result<T> = std::result::Result<T, WardenError>;
