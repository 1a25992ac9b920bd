/// Connection Management Module
///
/// A `Connection` owns its configuration, the native handle, one worker pool
/// and the registry of operations submitted through it. Callers refer to
/// operations by token only.
use crate::core::db::{generic_escape, ConnectParams, Driver, EngineKind, NativeHandle};
use crate::core::{BgsqlError, Registry, Result, Token};
use crate::operation::query::FetchClaim;
use crate::operation::Operation;
use crate::pool::{Job, PoolStats, WorkerPool};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Timeouts and pool size of a connection, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Milliseconds an operation may stay incomplete before polling reports it expired (0 = unbounded)
    pub async_timeout_ms: u32,
    /// Milliseconds a blocking wait may last
    pub blocking_timeout_ms: u32,
    /// Worker threads, and so the most operations executing at once
    pub thread_limit: u32,
}

impl ConnectionSettings {
    pub fn new(async_timeout_ms: u32, blocking_timeout_ms: u32, thread_limit: u32) -> Self {
        ConnectionSettings {
            async_timeout_ms,
            blocking_timeout_ms,
            thread_limit,
        }
    }

    /// Checks `thread_limit > 0` and `blocking <= async` when async is bounded.
    pub fn validate(&self) -> Result<()> {
        if self.async_timeout_ms != 0 && self.blocking_timeout_ms > self.async_timeout_ms {
            return Err(BgsqlError::InvalidArgument(
                "asyncTimeout must be greater than or equal to blockingTimeout".to_string(),
            ));
        }
        if self.thread_limit == 0 {
            return Err(BgsqlError::InvalidArgument(
                "threadLimit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn async_timeout(&self) -> Option<Duration> {
        match self.async_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        }
    }

    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.blocking_timeout_ms))
    }
}

/// Driver plus the live handle it produced, shared with the workers.
///
/// The handle mutex guarantees at most one worker drives the native
/// connection at a time.
pub(crate) struct NativeSession {
    driver: Arc<dyn Driver>,
    handle: Mutex<Option<Box<dyn NativeHandle>>>,
    connected: AtomicBool,
}

impl NativeSession {
    pub(crate) fn new(driver: Arc<dyn Driver>) -> Self {
        NativeSession {
            driver,
            handle: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub(crate) fn lock_handle(&self) -> MutexGuard<'_, Option<Box<dyn NativeHandle>>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replaces the live handle, closing the previous one.
    pub(crate) fn install(&self, handle: Box<dyn NativeHandle>) {
        let mut slot = self.lock_handle();
        *slot = Some(handle);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        let mut slot = self.lock_handle();
        self.connected.store(false, Ordering::Release);
        *slot = None;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn escape(&self, text: &str) -> Result<String> {
        let slot = self
            .handle
            .lock()
            .map_err(|_| BgsqlError::NotInitialized("Connection handle is poisoned".to_string()))?;
        Ok(match slot.as_ref() {
            Some(handle) => handle.escape(text),
            None => generic_escape(text),
        })
    }
}

/// One database connection with its own worker pool.
pub struct Connection {
    kind: EngineKind,
    settings: ConnectionSettings,
    session: Arc<NativeSession>,
    operations: Registry<Operation>,
    pool: WorkerPool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("settings", &self.settings)
            .field("connected", &self.is_connected())
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl Connection {
    /// Reserves a connection and starts its workers. Does not connect.
    pub fn new(kind: EngineKind, settings: ConnectionSettings, driver: Arc<dyn Driver>) -> Result<Self> {
        settings.validate()?;
        let session = Arc::new(NativeSession::new(driver));
        let pool = WorkerPool::new(settings.thread_limit as usize, Arc::clone(&session))?;
        Ok(Connection {
            kind,
            settings,
            session,
            operations: Registry::new(),
            pool,
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// True once a connect operation has installed a live handle.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn pool_stats(&self) -> &PoolStats {
        self.pool.stats()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Registers and queues `op`, rolling the registration back if queueing fails.
    fn submit(&self, op: Operation) -> Result<Token> {
        let op = Arc::new(op);
        let token = self.operations.insert(Arc::clone(&op))?;
        if let Err(err) = self.pool.submit(Job::Execute(op)) {
            self.operations.remove(&token);
            return Err(err);
        }
        debug!("Submitted operation {}", token);
        Ok(token)
    }

    /// Starts an asynchronous connect attempt.
    pub fn connect(&self, params: ConnectParams) -> Result<Token> {
        self.submit(Operation::connect(params))
    }

    /// Starts an asynchronous query. Fails with `NotConnected` without a live handle.
    pub fn create_query(&self, statement: &str) -> Result<Token> {
        if !self.is_connected() {
            return Err(BgsqlError::NotConnected);
        }
        self.submit(Operation::query(statement))
    }

    pub fn get_operation(&self, token: &Token) -> Option<Arc<Operation>> {
        self.operations.get(token)
    }

    /// Unregisters an operation, then waits for its worker to finish with it.
    pub fn release_operation(&self, token: &Token) -> Result<()> {
        let op = self
            .operations
            .remove(token)
            .ok_or(BgsqlError::NotFound("Operation"))?;
        op.wait(None);
        if let Some(query) = op.as_query() {
            query.wait_settled(None);
        }
        debug!("Released operation {}", token);
        Ok(())
    }

    /// Schedules an asynchronous advance of a query's cursor.
    ///
    /// Returns false, without side effects, while another advance is outstanding.
    pub fn begin_get_next_row(&self, op: &Arc<Operation>) -> Result<bool> {
        match op.claim_fetch()? {
            FetchClaim::Busy => Ok(false),
            FetchClaim::Exhausted => Ok(true),
            FetchClaim::Scheduled => {
                if let Err(err) = self.pool.submit(Job::FetchRow(Arc::clone(op))) {
                    op.release_claim();
                    return Err(err);
                }
                Ok(true)
            }
        }
    }

    /// Escapes `text` for a string literal, using the live handle when connected.
    pub fn quote(&self, text: &str) -> Result<String> {
        self.session.escape(text)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pool.shutdown();
        let released = self.operations.drain().len();
        info!("Connection closed ({} operations released)", released);
    }
}
