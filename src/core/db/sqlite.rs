/// SQLite Driver Module
///
/// Native client for the `Sqlite` engine kind, backed by rusqlite. Result rows
/// are read into client memory when the statement runs, so the cursor does not
/// borrow the handle between row fetches.
use crate::config::SqliteConfig;
use crate::core::db::driver::{BufferedRows, ConnectParams, Driver, NativeHandle, ResultSet};
use crate::core::db::row::Row;
use crate::core::EngineError;
use rusqlite::{types::ValueRef, Connection};
use std::time::Duration;
use tracing::debug;

/// Opens SQLite databases.
///
/// The database name selects the file to open; without one an in-memory
/// database is used. Host, port and credentials are ignored.
#[derive(Debug, Clone, Default)]
pub struct SqliteDriver {
    config: SqliteConfig,
}

impl SqliteDriver {
    pub fn new(config: SqliteConfig) -> Self {
        SqliteDriver { config }
    }
}

impl Driver for SqliteDriver {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn NativeHandle>, EngineError> {
        let path = params
            .database
            .as_deref()
            .filter(|db| !db.is_empty())
            .unwrap_or(":memory:");
        debug!("Opening SQLite database {}", path);

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(u64::from(self.config.busy_timeout_ms)))?;
        for pragma in &self.config.pragmas {
            conn.execute_batch(pragma)?;
        }

        Ok(Box::new(SqliteHandle { conn }))
    }
}

/// Live SQLite connection.
pub struct SqliteHandle {
    conn: Connection,
}

impl NativeHandle for SqliteHandle {
    fn execute(&mut self, sql: &str) -> Result<Box<dyn ResultSet>, EngineError> {
        let mut stmt = self.conn.prepare(sql)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = stmt.column_count();

        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(format_value(row.get_ref(i)?));
                }
                Ok(Row::new(values))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Box::new(BufferedRows::new(columns, rows)))
    }

    fn escape(&self, text: &str) -> String {
        text.replace('\'', "''")
    }
}

/// Formats a SQLite value as record text; NULL stays `None`.
fn format_value(value: ValueRef) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Some(String::from_utf8_lossy(b).to_string()),
    }
}
