//! bgsql: database connections served by background worker threads.
//!
//! Callers create a connection, start connect and query operations that run
//! on the connection's worker pool, then poll or block on them by token.

// Core infrastructure modules
pub mod config;
pub mod core;

// Concurrency core
pub mod connection;
pub mod library;
pub mod operation;
pub mod pool;

// Caller-facing facade
pub mod api;

#[cfg(test)]
mod test_utils;

pub use api::{global, version, Api, PollStatus};
pub use config::{load_config, Config};
pub use connection::{Connection, ConnectionSettings};
pub use crate::core::db::{ConnectParams, Driver, EngineKind, NativeHandle, ResultSet, Row};
pub use crate::core::{BgsqlError, EngineError, Result, Token};
pub use library::Library;
pub use operation::{Operation, OperationState, RowFetch};
