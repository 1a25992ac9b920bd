/// Error Module
///
/// This module defines the error types shared by every layer of bgsql.
/// Boundary validation failures are returned immediately as `BgsqlError`;
/// failures reported by a database engine are captured on worker threads as
/// `EngineError` and stored on the operation for later retrieval.
use std::fmt;
use thiserror::Error;

/// Failure reported by a native database client.
///
/// Carries the engine's own message and machine-readable code
/// (MySQL errno, SQLite extended result code, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub message: String,
    pub code: i32,
}

impl EngineError {
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        EngineError {
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for EngineError {}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let message = message.unwrap_or_else(|| failure.to_string());
                EngineError::new(message, failure.extended_code)
            }
            // SQLITE_ERROR for failures raised on the Rust side of the binding
            other => EngineError::new(other.to_string(), 1),
        }
    }
}

/// Error type for every boundary operation of bgsql.
///
/// Every variant renders as a single human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BgsqlError {
    /// Malformed or missing argument: identifiers, ports, timeouts, engine names
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The library or connection has been torn down or was never created
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Unknown connection or operation identifier
    #[error("{0} identifier does not exist")]
    NotFound(&'static str),

    /// Row operations invoked on a non-query operation
    #[error("Operation is not a query")]
    WrongOperationKind,

    /// Query attempted without a live native handle
    #[error("Connection is not established")]
    NotConnected,

    /// A row fetch is already outstanding for this query
    #[error("Query in progress")]
    Busy,

    /// A blocking wait exceeded the connection's blocking timeout
    #[error("Operation timed out")]
    Timeout,

    /// Operation is not in a state that allows the request
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Allocation or thread creation failed
    #[error("Out of resources: {0}")]
    ResourceExhausted(String),

    /// The native client reported a failure
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Type alias for Result to use BgsqlError as the error type.
pub type Result<T> = std::result::Result<T, BgsqlError>;
