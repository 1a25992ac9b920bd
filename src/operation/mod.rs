/// Operation Module
///
/// An operation is one asynchronous unit of work tracked through the state
/// machine in `state.rs`. Variants share that state core and differ only in
/// their payload: `ConnectOperation` establishes the native handle and
/// `QueryOperation` runs a statement and iterates its rows.
pub mod connect;
pub mod query;
pub mod state;

pub use connect::ConnectOperation;
pub use query::{CursorState, QueryOperation, RowFetch};
pub use state::{OperationState, OperationStatus, POLL_SLICE};

use crate::connection::NativeSession;
use crate::core::db::ConnectParams;
use crate::core::{BgsqlError, EngineError, Result};
use query::FetchClaim;
use std::time::Duration;
use tracing::{debug, warn};

/// Code recorded on operations the worker never ran.
pub const ABANDONED_CODE: i32 = -1;

/// Variant-specific payload of an operation.
#[derive(Debug)]
pub enum OperationKind {
    Connect(ConnectOperation),
    Query(QueryOperation),
}

/// An asynchronous unit of work owned by a connection's registry.
#[derive(Debug)]
pub struct Operation {
    status: OperationStatus,
    kind: OperationKind,
}

impl Operation {
    pub fn connect(params: ConnectParams) -> Self {
        Operation {
            status: OperationStatus::new(),
            kind: OperationKind::Connect(ConnectOperation::new(params)),
        }
    }

    pub fn query(statement: impl Into<String>) -> Self {
        Operation {
            status: OperationStatus::new(),
            kind: OperationKind::Query(QueryOperation::new(statement)),
        }
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    pub fn state(&self) -> OperationState {
        self.status.state()
    }

    pub fn is_complete(&self, block: bool) -> bool {
        self.status.is_complete(block)
    }

    pub fn wait(&self, timeout: Option<Duration>) -> OperationState {
        self.status.wait(timeout)
    }

    pub fn error(&self) -> Option<EngineError> {
        self.status.error()
    }

    pub fn is_query(&self) -> bool {
        matches!(self.kind, OperationKind::Query(_))
    }

    pub fn as_query(&self) -> Option<&QueryOperation> {
        match &self.kind {
            OperationKind::Query(query) => Some(query),
            OperationKind::Connect(_) => None,
        }
    }

    fn require_query(&self) -> Result<&QueryOperation> {
        self.as_query().ok_or(BgsqlError::WrongOperationKind)
    }

    fn require_complete(&self) -> Result<()> {
        match self.state() {
            OperationState::Complete => Ok(()),
            OperationState::Failed => Err(BgsqlError::InvalidState("Operation failed".to_string())),
            OperationState::Pending | OperationState::Running => {
                Err(BgsqlError::InvalidState("Operation is not complete".to_string()))
            }
        }
    }

    /// Serialized current row of a completed query.
    ///
    /// `None` before the first fetch and after the cursor is exhausted.
    pub fn current_row(&self) -> Result<Option<String>> {
        let query = self.require_query()?;
        self.require_complete()?;
        query.current_record()
    }

    /// Current row of a completed query as a JSON object keyed by column.
    pub fn current_row_json(&self) -> Result<Option<serde_json::Value>> {
        let query = self.require_query()?;
        self.require_complete()?;
        query.current_json()
    }

    /// Advances the cursor inline and returns the row reached.
    pub fn fetch_next_row(&self) -> Result<RowFetch> {
        let query = self.require_query()?;
        match self.state() {
            OperationState::Pending | OperationState::Running => Ok(RowFetch::NotDone),
            OperationState::Failed => Err(BgsqlError::InvalidState("Operation failed".to_string())),
            OperationState::Complete => Ok(query.fetch_inline()),
        }
    }

    /// Waits for an outstanding row fetch to finish. True once settled.
    pub fn wait_for_row(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(self.require_query()?.wait_settled(timeout))
    }

    pub(crate) fn claim_fetch(&self) -> Result<FetchClaim> {
        let query = self.require_query()?;
        self.require_complete()?;
        Ok(query.claim_fetch())
    }

    /// Executes the operation's blocking work. Worker threads only.
    pub(crate) fn run(&self, session: &NativeSession) {
        if !self.status.start() {
            return;
        }
        let outcome = match &self.kind {
            OperationKind::Connect(connect) => connect.execute(session),
            OperationKind::Query(query) => query.execute(session),
        };
        match &outcome {
            Ok(()) => debug!("Operation complete"),
            Err(err) => debug!("Operation failed: {}", err),
        }
        self.status.finish(outcome);
    }

    /// Fails an operation without running it. Worker threads only.
    pub(crate) fn abandon(&self, reason: &str) {
        if self.status.start() {
            self.status.finish(Err(EngineError::new(reason, ABANDONED_CODE)));
        }
    }

    /// Settles whatever a panicking worker left behind.
    pub(crate) fn recover(&self, reason: &str) {
        warn!("Recovering operation after worker panic: {}", reason);
        self.status.start();
        self.status.finish(Err(EngineError::new(reason, ABANDONED_CODE)));
    }

    /// Advances the query cursor by one row. Worker threads only.
    pub(crate) fn advance_cursor(&self) {
        if let Some(query) = self.as_query() {
            query.advance();
        }
    }

    pub(crate) fn abort_fetch(&self, reason: &str) {
        if let Some(query) = self.as_query() {
            query.abort_fetch(EngineError::new(reason, ABANDONED_CODE));
        }
    }

    pub(crate) fn release_claim(&self) {
        if let Some(query) = self.as_query() {
            query.release_claim();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectParams {
        ConnectParams {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "user".to_string(),
            password: "pass".to_string(),
            database: None,
        }
    }

    #[test]
    fn test_row_operations_reject_connect() {
        let op = Operation::connect(params());
        assert!(!op.is_query());
        assert_eq!(op.current_row(), Err(BgsqlError::WrongOperationKind));
        assert_eq!(op.fetch_next_row(), Err(BgsqlError::WrongOperationKind));
        assert!(matches!(op.claim_fetch(), Err(BgsqlError::WrongOperationKind)));
    }

    #[test]
    fn test_row_operations_before_completion() {
        let op = Operation::query("SELECT 1");
        assert!(op.is_query());
        assert_eq!(op.fetch_next_row(), Ok(RowFetch::NotDone));
        assert!(matches!(op.current_row(), Err(BgsqlError::InvalidState(_))));
        assert!(matches!(op.claim_fetch(), Err(BgsqlError::InvalidState(_))));
    }

    #[test]
    fn test_abandon_fails_pending_operation() {
        let op = Operation::query("SELECT 1");
        op.abandon("Connection released");
        assert_eq!(op.state(), OperationState::Failed);
        let err = op.error().unwrap();
        assert_eq!(err.message, "Connection released");
        assert_eq!(err.code, ABANDONED_CODE);
        assert!(matches!(op.fetch_next_row(), Err(BgsqlError::InvalidState(_))));
    }

    #[test]
    fn test_recover_settles_running_operation() {
        let op = Operation::connect(params());
        op.status().start();
        op.recover("driver panicked");
        assert_eq!(op.state(), OperationState::Failed);
        assert!(op.is_complete(false));
    }
}
