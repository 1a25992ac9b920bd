/// Caller Facade Module
///
/// The protocol a host process drives: raw arguments are validated here,
/// freshly created identifiers and fetched rows are parked in single-item
/// hand-off slots for the next call to collect, and the poll/block helpers
/// enforce each connection's timeouts.
use crate::config::Config;
use crate::connection::{Connection, ConnectionSettings};
use crate::core::db::{ConnectParams, EngineKind};
use crate::core::{BgsqlError, Result, Token};
use crate::library::Library;
use crate::operation::{Operation, OperationState, RowFetch};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Answer of a non-blocking completion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Complete,
    Failed,
    NotDone,
    /// Still running past the connection's async timeout; the work continues
    Expired,
}

/// Single-item slot overwritten by each producer call and emptied by each read.
struct HandOff<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for HandOff<T> {
    fn default() -> Self {
        HandOff {
            slot: Mutex::new(None),
        }
    }
}

impl<T> HandOff<T> {
    fn set(&self, value: Option<T>) -> Option<T> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, value)
    }

    fn put(&self, value: T) -> Option<T> {
        self.set(Some(value))
    }

    fn take(&self) -> Option<T> {
        self.set(None)
    }
}

/// Caller-facing entry point wrapping one `Library`.
#[derive(Default)]
pub struct Api {
    config: Config,
    library: RwLock<Option<Arc<Library>>>,
    last_connection: HandOff<Token>,
    last_operation: HandOff<Token>,
    last_row: HandOff<String>,
}

static GLOBAL: Lazy<Api> = Lazy::new(Api::default);

/// Version of this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Process-wide facade, uninitialized until `initialize` is called on it.
pub fn global() -> &'static Api {
    &GLOBAL
}

fn identifier(raw: &str, what: &str) -> Result<Token> {
    if raw.trim().is_empty() {
        return Err(BgsqlError::InvalidArgument(format!("Invalid {} identifier", what)));
    }
    Ok(Token::from(raw))
}

fn timeout_arg(value: i64, name: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| BgsqlError::InvalidArgument(format!("{} must be an unsigned integer", name)))
}

fn parse_port(raw: &str) -> Result<u16> {
    let port: i64 = raw
        .trim()
        .parse()
        .map_err(|_| BgsqlError::InvalidArgument("Port is not a number".to_string()))?;
    u16::try_from(port)
        .map_err(|_| BgsqlError::InvalidArgument("Port is out of acceptable range".to_string()))
}

impl Api {
    /// Creates an uninitialized facade.
    pub fn new(config: Config) -> Self {
        Api {
            config,
            ..Api::default()
        }
    }

    /// Creates a facade around an existing library.
    pub fn with_library(library: Library) -> Self {
        let api = Api::default();
        api.install(library);
        api
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn install(&self, library: Library) {
        let previous = {
            let mut slot = self.library.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.replace(Arc::new(library))
        };
        drop(previous);
    }

    /// Creates the library from this facade's configuration, replacing any existing one.
    pub fn initialize(&self) {
        self.install(Library::with_config(&self.config));
        info!("bgsql initialized");
    }

    /// Tears down the library and every connection it owns.
    pub fn shutdown(&self) -> Result<()> {
        let library = {
            let mut slot = self.library.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        }
        .ok_or_else(not_initialized)?;
        self.last_connection.take();
        self.last_operation.take();
        self.last_row.take();
        drop(library);
        info!("bgsql shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.library
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn library(&self) -> Result<Arc<Library>> {
        self.library
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(not_initialized)
    }

    fn connection(&self, connection_id: &str) -> Result<Arc<Connection>> {
        let token = identifier(connection_id, "connection")?;
        self.library()?
            .get_connection(&token)
            .ok_or(BgsqlError::NotFound("Connection"))
    }

    fn operation(&self, connection_id: &str, operation_id: &str) -> Result<(Arc<Connection>, Arc<Operation>)> {
        let connection = self.connection(connection_id)?;
        let token = identifier(operation_id, "operation")?;
        let operation = connection
            .get_operation(&token)
            .ok_or(BgsqlError::NotFound("Operation"))?;
        Ok((connection, operation))
    }

    /// Validates raw arguments and creates a connection.
    ///
    /// The new identifier is parked for `get_connection`. A previously parked,
    /// never collected connection is released once the new one exists; a
    /// failed create leaves the slot untouched.
    pub fn create_connection(
        &self,
        engine: &str,
        async_timeout: i64,
        blocking_timeout: i64,
        thread_limit: i64,
    ) -> Result<()> {
        let library = self.library()?;
        let kind: EngineKind = engine.parse()?;
        let async_timeout = timeout_arg(async_timeout, "asyncTimeout")?;
        let blocking_timeout = timeout_arg(blocking_timeout, "blockingTimeout")?;
        if thread_limit <= 0 {
            return Err(BgsqlError::InvalidArgument(
                "threadLimit must be greater than zero".to_string(),
            ));
        }
        let thread_limit = u32::try_from(thread_limit)
            .map_err(|_| BgsqlError::InvalidArgument("threadLimit is too large".to_string()))?;
        let settings = ConnectionSettings::new(async_timeout, blocking_timeout, thread_limit);
        settings.validate()?;

        let token = library.create_connection(kind, settings)?;
        if let Some(unclaimed) = self.last_connection.put(token) {
            debug!("Releasing unclaimed connection {}", unclaimed);
            if let Err(err) = library.release_connection(&unclaimed) {
                debug!("Unclaimed connection {} already gone: {}", unclaimed, err);
            }
        }
        Ok(())
    }

    /// `create_connection` with the timeouts and thread limit from the configuration.
    pub fn create_connection_with_defaults(&self, engine: &str) -> Result<()> {
        let defaults = &self.config.connection;
        self.create_connection(
            engine,
            i64::from(defaults.async_timeout_ms),
            i64::from(defaults.blocking_timeout_ms),
            i64::from(defaults.thread_limit),
        )
    }

    /// Collects the most recently created connection identifier, once.
    pub fn get_connection(&self) -> Option<String> {
        self.last_connection.take().map(|token| token.to_string())
    }

    pub fn release_connection(&self, connection_id: &str) -> Result<()> {
        let token = identifier(connection_id, "connection")?;
        self.library()?.release_connection(&token)
    }

    /// Starts a connect attempt; its identifier is parked for `get_operation`.
    pub fn open_connection(
        &self,
        connection_id: &str,
        host: &str,
        port: &str,
        user: &str,
        password: &str,
        database: Option<&str>,
    ) -> Result<()> {
        identifier(connection_id, "connection")?;
        let port = parse_port(port)?;
        let connection = self.connection(connection_id)?;

        self.last_operation.take();
        let token = connection.connect(ConnectParams {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            database: database.map(str::to_string),
        })?;
        self.last_operation.put(token);
        Ok(())
    }

    /// Starts a query; its identifier is parked for `get_operation`.
    pub fn new_query(&self, connection_id: &str, statement: &str) -> Result<()> {
        let connection = self.connection(connection_id)?;
        self.last_operation.take();
        let token = connection.create_query(statement)?;
        self.last_operation.put(token);
        Ok(())
    }

    /// Collects the most recently created operation identifier, once.
    pub fn get_operation(&self) -> Option<String> {
        self.last_operation.take().map(|token| token.to_string())
    }

    pub fn release_operation(&self, connection_id: &str, operation_id: &str) -> Result<()> {
        let connection = self.connection(connection_id)?;
        let token = identifier(operation_id, "operation")?;
        connection.release_operation(&token)
    }

    /// Non-blocking completion check.
    pub fn op_complete(&self, connection_id: &str, operation_id: &str) -> Result<PollStatus> {
        let (connection, operation) = self.operation(connection_id, operation_id)?;
        Ok(match operation.state() {
            OperationState::Complete => PollStatus::Complete,
            OperationState::Failed => PollStatus::Failed,
            OperationState::Pending | OperationState::Running => {
                match connection.settings().async_timeout() {
                    Some(limit) if operation.status().elapsed() > limit => PollStatus::Expired,
                    _ => PollStatus::NotDone,
                }
            }
        })
    }

    /// Waits up to the connection's blocking timeout for the operation to finish.
    ///
    /// On timeout the operation keeps running and stays retrievable. For a
    /// query, an outstanding row fetch is awaited too and the current row is
    /// parked for `get_row`.
    pub fn block_on_operation(&self, connection_id: &str, operation_id: &str) -> Result<OperationState> {
        let (connection, operation) = self.operation(connection_id, operation_id)?;
        let limit = connection.settings().blocking_timeout();
        let started = Instant::now();

        let state = operation.wait(Some(limit));
        if !state.is_terminal() {
            return Err(BgsqlError::Timeout);
        }
        if operation.is_query() && state == OperationState::Complete {
            let remaining = limit.saturating_sub(started.elapsed());
            if !operation.wait_for_row(Some(remaining))? {
                return Err(BgsqlError::Timeout);
            }
            self.last_row.set(operation.current_row()?);
        }
        Ok(state)
    }

    /// Synchronously advances a query's cursor and returns the row reached.
    pub fn fetch_row(&self, connection_id: &str, operation_id: &str) -> Result<RowFetch> {
        let (_, operation) = self.operation(connection_id, operation_id)?;
        operation.fetch_next_row()
    }

    /// Starts an asynchronous row fetch; `Busy` if one is already outstanding.
    pub fn begin_fetch_next_row(&self, connection_id: &str, operation_id: &str) -> Result<()> {
        let (connection, operation) = self.operation(connection_id, operation_id)?;
        if connection.begin_get_next_row(&operation)? {
            Ok(())
        } else {
            Err(BgsqlError::Busy)
        }
    }

    /// Reports whether a query's latest fetch finished, parking its row for `get_row`.
    pub fn ready_row(&self, connection_id: &str, operation_id: &str) -> Result<PollStatus> {
        let (_, operation) = self.operation(connection_id, operation_id)?;
        let query = operation.as_query().ok_or(BgsqlError::WrongOperationKind)?;
        match operation.state() {
            OperationState::Pending | OperationState::Running => return Ok(PollStatus::NotDone),
            OperationState::Failed => return Ok(PollStatus::Failed),
            OperationState::Complete => {}
        }
        if !query.wait_settled(Some(Duration::ZERO)) {
            return Ok(PollStatus::NotDone);
        }
        self.last_row.set(operation.current_row()?);
        Ok(PollStatus::Complete)
    }

    /// Collects the most recently parked row, once.
    pub fn get_row(&self) -> Option<String> {
        self.last_row.take()
    }

    /// Error message of a finished operation; empty when it succeeded.
    pub fn get_error(&self, connection_id: &str, operation_id: &str) -> Result<String> {
        let (_, operation) = self.operation(connection_id, operation_id)?;
        if !operation.is_complete(true) {
            return Err(BgsqlError::InvalidState("Operation is not complete".to_string()));
        }
        Ok(operation.error().map(|err| err.message).unwrap_or_default())
    }

    /// Engine error code of a finished operation; `None` when it succeeded.
    pub fn get_error_code(&self, connection_id: &str, operation_id: &str) -> Result<Option<i32>> {
        let (_, operation) = self.operation(connection_id, operation_id)?;
        if !operation.is_complete(true) {
            return Err(BgsqlError::InvalidState("Operation is not complete".to_string()));
        }
        Ok(operation.error().map(|err| err.code))
    }

    pub fn quote(&self, connection_id: &str, text: &str) -> Result<String> {
        self.connection(connection_id)?.quote(text)
    }
}

fn not_initialized() -> BgsqlError {
    BgsqlError::NotInitialized("Library not initialized".to_string())
}
