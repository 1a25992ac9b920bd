/// MySQL Driver Module
///
/// Native client for the `MySql` engine kind, backed by the blocking `mysql`
/// crate. Rows are read with the text protocol and buffered client-side, the
/// same shape as a stored MySQL result.
use crate::core::db::driver::{BufferedRows, ConnectParams, Driver, NativeHandle, ResultSet};
use crate::core::db::row::Row;
use crate::core::EngineError;
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Value};
use tracing::debug;

/// CR_UNKNOWN_ERROR, used when the client fails without a server errno.
const CLIENT_ERROR_CODE: i32 = 2000;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl Driver for MySqlDriver {
    fn connect(&self, params: &ConnectParams) -> Result<Box<dyn NativeHandle>, EngineError> {
        debug!("Connecting to MySQL at {}:{}", params.host, params.port);
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(params.host.clone()))
            .tcp_port(params.port)
            .user(Some(params.user.clone()))
            .pass(Some(params.password.clone()))
            .db_name(params.database.clone().filter(|db| !db.is_empty()));

        let conn = Conn::new(opts).map_err(map_error)?;
        Ok(Box::new(MySqlHandle { conn }))
    }
}

pub struct MySqlHandle {
    conn: Conn,
}

impl NativeHandle for MySqlHandle {
    fn execute(&mut self, sql: &str) -> Result<Box<dyn ResultSet>, EngineError> {
        let mut result = self.conn.query_iter(sql).map_err(map_error)?;

        let columns: Vec<String> = result
            .columns()
            .as_ref()
            .iter()
            .map(|column| column.name_str().to_string())
            .collect();

        let mut rows = Vec::new();
        for row in result.by_ref() {
            let row = row.map_err(map_error)?;
            let values = (0..row.len())
                .map(|i| row.as_ref(i).and_then(format_value))
                .collect();
            rows.push(Row::new(values));
        }

        Ok(Box::new(BufferedRows::new(columns, rows)))
    }
}

fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Double(d) => Some(d.to_string()),
        other => Some(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

fn map_error(err: mysql::Error) -> EngineError {
    match err {
        mysql::Error::MySqlError(server) => EngineError::new(server.message, i32::from(server.code)),
        other => EngineError::new(other.to_string(), CLIENT_ERROR_CODE),
    }
}
