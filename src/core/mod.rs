/// Core Module for bgsql
///
/// Shared infrastructure below the concurrency core: error types, the
/// identifier registry and the native database client layer.

pub mod db;
pub mod error;
pub mod registry;

// Re-export commonly used types for convenience
pub use error::{BgsqlError, EngineError, Result};
pub use registry::{Registry, Token};
