/// Driver Abstraction Module
///
/// Native database clients are synchronous libraries driven from worker
/// threads. This module defines the seam between the concurrency core and
/// those clients.
use crate::core::db::row::Row;
use crate::core::{BgsqlError, EngineError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Database engines a connection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    MySql,
    Sqlite,
    /// Recognised but no driver ships for it
    SqlServer,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::MySql => "MySql",
            EngineKind::Sqlite => "Sqlite",
            EngineKind::SqlServer => "SqlServer",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = BgsqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(EngineKind::MySql),
            "sqlite" => Ok(EngineKind::Sqlite),
            "sqlserver" => Ok(EngineKind::SqlServer),
            _ => Err(BgsqlError::InvalidArgument(format!(
                "Invalid connection type: {}",
                s
            ))),
        }
    }
}

/// Parameters of a connect attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Entry point of a native client library.
pub trait Driver: Send + Sync {
    /// Performs the blocking handshake.
    fn connect(&self, params: &ConnectParams) -> std::result::Result<Box<dyn NativeHandle>, EngineError>;
}

/// A live connection owned by exactly one `Connection`.
///
/// Handles are not required to be thread-safe; the owning connection
/// serializes access.
pub trait NativeHandle: Send {
    /// Runs `sql` and returns its rows, buffered or streaming.
    fn execute(&mut self, sql: &str) -> std::result::Result<Box<dyn ResultSet>, EngineError>;

    /// Escapes `text` for inclusion inside a quoted string literal.
    fn escape(&self, text: &str) -> String {
        generic_escape(text)
    }
}

/// Cursor over the rows of one executed statement.
pub trait ResultSet: Send {
    fn columns(&self) -> &[String];

    /// Advances to the next row; `Ok(None)` once the rows are exhausted.
    fn next_row(&mut self) -> std::result::Result<Option<Row>, EngineError>;
}

/// Result set held entirely in client memory.
#[derive(Debug, Default)]
pub struct BufferedRows {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl BufferedRows {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        BufferedRows {
            columns,
            rows: rows.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl ResultSet for BufferedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> std::result::Result<Option<Row>, EngineError> {
        Ok(self.rows.pop_front())
    }
}

/// Escaping used when no live handle is available.
///
/// Mirrors the MySQL client's escaping: backslash-escapes NUL, newline,
/// carriage return, backslash, both quote characters and Ctrl-Z.
pub fn generic_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\u{1a}' => escaped.push_str("\\Z"),
            other => escaped.push(other),
        }
    }
    escaped
}
