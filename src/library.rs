/// Library Module
///
/// The root object: a registry of connections keyed by token, plus the
/// drivers available for each engine kind. Dropping the library closes every
/// connection and joins every worker thread.
use crate::config::Config;
use crate::connection::{Connection, ConnectionSettings};
use crate::core::db::{Driver, EngineKind, SqliteDriver};
use crate::core::{BgsqlError, Registry, Result, Token};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Library {
    drivers: HashMap<EngineKind, Arc<dyn Driver>>,
    connections: Registry<Connection>,
}

impl Library {
    /// Creates a library with the default configuration.
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Creates a library whose built-in drivers use `config`.
    pub fn with_config(config: &Config) -> Self {
        let mut drivers: HashMap<EngineKind, Arc<dyn Driver>> = HashMap::new();
        drivers.insert(EngineKind::Sqlite, Arc::new(SqliteDriver::new(config.sqlite.clone())));
        #[cfg(feature = "mysql")]
        drivers.insert(EngineKind::MySql, Arc::new(crate::core::db::MySqlDriver));

        Library {
            drivers,
            connections: Registry::new(),
        }
    }

    /// Registers `driver` for `kind`, replacing any built-in one.
    pub fn with_driver(mut self, kind: EngineKind, driver: Arc<dyn Driver>) -> Self {
        self.drivers.insert(kind, driver);
        self
    }

    pub fn supports(&self, kind: EngineKind) -> bool {
        self.drivers.contains_key(&kind)
    }

    /// Creates a connection without connecting it.
    ///
    /// Nothing is registered unless the whole creation succeeds.
    pub fn create_connection(&self, kind: EngineKind, settings: ConnectionSettings) -> Result<Token> {
        settings.validate()?;
        let driver = self.drivers.get(&kind).cloned().ok_or_else(|| {
            BgsqlError::InvalidArgument(format!("{} is not supported in this release", kind))
        })?;

        let connection = Arc::new(Connection::new(kind, settings, driver)?);
        let token = self.connections.insert(connection)?;
        info!(
            "Created {} connection {} (async {}ms, blocking {}ms, {} threads)",
            kind, token, settings.async_timeout_ms, settings.blocking_timeout_ms, settings.thread_limit
        );
        Ok(token)
    }

    pub fn get_connection(&self, token: &Token) -> Option<Arc<Connection>> {
        self.connections.get(token)
    }

    /// Unregisters and tears down a connection, blocking until its pool drains.
    ///
    /// If another thread still holds the connection, teardown runs on that
    /// thread when it lets go and this call returns without waiting.
    pub fn release_connection(&self, token: &Token) -> Result<()> {
        let connection = self
            .connections
            .remove(token)
            .ok_or(BgsqlError::NotFound("Connection"))?;
        if Arc::strong_count(&connection) > 1 {
            warn!("Connection {} is still referenced; teardown deferred to its last user", token);
        }
        drop(connection);
        info!("Released connection {}", token);
        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        let connections = self.connections.drain();
        if !connections.is_empty() {
            info!("Shutting down {} connections", connections.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::ConnectParams;
    use crate::operation::{OperationState, RowFetch};
    use crate::test_utils::{init_tracing, ScriptedDriver};
    use std::time::Duration;

    fn library() -> Library {
        init_tracing();
        Library::new().with_driver(EngineKind::MySql, Arc::new(ScriptedDriver::new()))
    }

    #[test]
    fn test_create_and_get_connection() {
        let library = library();
        let token = library
            .create_connection(EngineKind::MySql, ConnectionSettings::new(5000, 2000, 4))
            .unwrap();
        let connection = library.get_connection(&token).unwrap();
        assert_eq!(connection.kind(), EngineKind::MySql);
        assert_eq!(connection.settings().thread_limit, 4);
        assert!(!connection.is_connected());
        assert_eq!(library.connection_count(), 1);
    }

    #[test]
    fn test_invalid_settings_register_nothing() {
        let library = library();
        for settings in [
            ConnectionSettings::new(1000, 2000, 4),
            ConnectionSettings::new(1000, 500, 0),
        ] {
            assert!(matches!(
                library.create_connection(EngineKind::MySql, settings),
                Err(BgsqlError::InvalidArgument(_))
            ));
        }
        assert_eq!(library.connection_count(), 0);
    }

    #[test]
    fn test_unsupported_engine() {
        let library = library();
        match library.create_connection(EngineKind::SqlServer, ConnectionSettings::new(0, 0, 1)) {
            Err(BgsqlError::InvalidArgument(msg)) => assert!(msg.contains("SqlServer")),
            other => panic!("Expected InvalidArgument, got {:?}", other),
        }
        assert!(!library.supports(EngineKind::SqlServer));
        assert!(library.supports(EngineKind::Sqlite));
        assert_eq!(library.connection_count(), 0);
    }

    #[test]
    fn test_release_connection() {
        let library = library();
        let token = library
            .create_connection(EngineKind::MySql, ConnectionSettings::new(0, 100, 2))
            .unwrap();
        library.release_connection(&token).unwrap();
        assert!(library.get_connection(&token).is_none());
        assert_eq!(
            library.release_connection(&token),
            Err(BgsqlError::NotFound("Connection"))
        );
    }

    #[test]
    fn test_release_while_held_defers_teardown() {
        let library = library();
        let token = library
            .create_connection(EngineKind::MySql, ConnectionSettings::new(0, 100, 2))
            .unwrap();
        let held = library.get_connection(&token).unwrap();

        library.release_connection(&token).unwrap();
        assert!(library.get_connection(&token).is_none());
        assert_eq!(held.pool_stats().running(), 0);
        assert_eq!(held.quote("x"), Ok("x".to_string()));
        drop(held);
    }

    #[test]
    fn test_sqlite_end_to_end() {
        let library = library();
        let token = library
            .create_connection(EngineKind::Sqlite, ConnectionSettings::new(5000, 2000, 2))
            .unwrap();
        let connection = library.get_connection(&token).unwrap();

        let connect = connection
            .connect(ConnectParams {
                host: String::new(),
                port: 0,
                user: String::new(),
                password: String::new(),
                database: None,
            })
            .unwrap();
        let connect = connection.get_operation(&connect).unwrap();
        assert_eq!(connect.wait(Some(Duration::from_secs(10))), OperationState::Complete);

        let query = connection.create_query("SELECT 1").unwrap();
        let query = connection.get_operation(&query).unwrap();
        assert_eq!(query.wait(Some(Duration::from_secs(10))), OperationState::Complete);
        assert_eq!(query.fetch_next_row().unwrap(), RowFetch::Row("1".to_string()));
        assert_eq!(query.fetch_next_row().unwrap(), RowFetch::Exhausted);
    }

    #[test]
    fn test_drop_tears_down_connections() {
        let driver = ScriptedDriver::new().with_connect_delay(Duration::from_millis(30));
        let library = Library::new().with_driver(EngineKind::MySql, Arc::new(driver.clone()));
        let token = library
            .create_connection(EngineKind::MySql, ConnectionSettings::new(0, 0, 2))
            .unwrap();
        let connection = library.get_connection(&token).unwrap();
        let op = connection
            .connect(ConnectParams {
                host: "127.0.0.1".to_string(),
                port: 3306,
                user: "user".to_string(),
                password: "pass".to_string(),
                database: None,
            })
            .unwrap();
        let op = connection.get_operation(&op).unwrap();
        drop(connection);
        drop(library);
        assert!(op.is_complete(false));
        assert_eq!(driver.in_flight(), 0);
    }
}
