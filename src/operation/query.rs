/// Query Operation Module
///
/// A query runs its statement on a worker and then exposes a row cursor.
/// The cursor advances one row at a time, either on a worker (`advance`) or
/// inline on the caller's thread (`fetch_inline`). Only one advance may be
/// outstanding at a time.
use crate::connection::NativeSession;
use crate::core::db::{ResultSet, Row};
use crate::core::{BgsqlError, EngineError, Result};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Code stored on a query that ran without a live handle (CR_CONNECTION_ERROR).
pub const NOT_CONNECTED_CODE: i32 = 2002;

/// Position of a query's row cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No row fetched yet
    NotStarted,
    /// An advance is outstanding
    Fetching,
    /// A row is buffered
    RowReady,
    /// No more rows; terminal
    Exhausted,
}

/// Outcome of a synchronous row fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFetch {
    /// The query or an outstanding fetch is still running
    NotDone,
    /// Serialized record of the row fetched
    Row(String),
    /// The cursor has no more rows
    Exhausted,
}

/// Result of asking to start an asynchronous advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchClaim {
    /// Another advance is outstanding
    Busy,
    /// The cursor is now Fetching; an advance must be scheduled
    Scheduled,
    /// Nothing left to fetch
    Exhausted,
}

struct Cursor {
    state: CursorState,
    rows: Option<Box<dyn ResultSet>>,
    columns: Vec<String>,
    current: Option<Row>,
    fetch_error: Option<EngineError>,
}

impl Cursor {
    fn apply(&mut self, fetched: std::result::Result<Option<Row>, EngineError>, rows: Option<Box<dyn ResultSet>>) {
        match fetched {
            Ok(Some(row)) => {
                self.state = CursorState::RowReady;
                self.current = Some(row);
                self.rows = rows;
            }
            Ok(None) => {
                debug!("Query cursor exhausted");
                self.state = CursorState::Exhausted;
                self.current = None;
            }
            Err(err) => {
                debug!("Row fetch failed: {}", err);
                self.state = CursorState::Exhausted;
                self.current = None;
                self.fetch_error = Some(err);
            }
        }
    }
}

/// Executes one statement and iterates its rows.
pub struct QueryOperation {
    statement: String,
    cursor: Mutex<Cursor>,
    fetched: Condvar,
}

impl fmt::Debug for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOperation")
            .field("statement", &self.statement)
            .field("cursor", &self.cursor_state())
            .finish()
    }
}

impl QueryOperation {
    pub fn new(statement: impl Into<String>) -> Self {
        QueryOperation {
            statement: statement.into(),
            cursor: Mutex::new(Cursor {
                state: CursorState::NotStarted,
                rows: None,
                columns: Vec::new(),
                current: None,
                fetch_error: None,
            }),
            fetched: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn cursor_state(&self) -> CursorState {
        self.lock().state
    }

    /// Column names of the result set; empty until the statement ran.
    pub fn columns(&self) -> Vec<String> {
        self.lock().columns.clone()
    }

    /// Error raised by the native client while advancing the cursor, if any.
    pub fn fetch_error(&self) -> Option<EngineError> {
        self.lock().fetch_error.clone()
    }

    /// Runs the statement against the session's handle on a worker thread.
    pub(crate) fn execute(&self, session: &NativeSession) -> std::result::Result<(), EngineError> {
        let rows = {
            let mut handle = session.lock_handle();
            let handle = handle
                .as_mut()
                .ok_or_else(|| EngineError::new("Connection is not established", NOT_CONNECTED_CODE))?;
            handle.execute(&self.statement)?
        };

        let mut cursor = self.lock();
        cursor.columns = rows.columns().to_vec();
        cursor.rows = Some(rows);
        cursor.state = CursorState::NotStarted;
        Ok(())
    }

    /// Serialized buffered row; `None` before the first fetch and once exhausted.
    pub(crate) fn current_record(&self) -> Result<Option<String>> {
        let cursor = self.lock();
        match cursor.state {
            CursorState::Fetching => Err(BgsqlError::InvalidState("Row fetch in progress".to_string())),
            CursorState::RowReady => Ok(cursor.current.as_ref().map(Row::to_record)),
            CursorState::NotStarted | CursorState::Exhausted => Ok(None),
        }
    }

    pub(crate) fn current_json(&self) -> Result<Option<serde_json::Value>> {
        let cursor = self.lock();
        match cursor.state {
            CursorState::Fetching => Err(BgsqlError::InvalidState("Row fetch in progress".to_string())),
            CursorState::RowReady => Ok(cursor.current.as_ref().map(|row| row.to_json(&cursor.columns))),
            CursorState::NotStarted | CursorState::Exhausted => Ok(None),
        }
    }

    /// Marks the cursor Fetching unless an advance is already outstanding.
    pub(crate) fn claim_fetch(&self) -> FetchClaim {
        let mut cursor = self.lock();
        match cursor.state {
            CursorState::Fetching => FetchClaim::Busy,
            CursorState::Exhausted => FetchClaim::Exhausted,
            CursorState::NotStarted | CursorState::RowReady => {
                cursor.state = CursorState::Fetching;
                FetchClaim::Scheduled
            }
        }
    }

    /// Undoes a claim whose advance could not be scheduled.
    pub(crate) fn release_claim(&self) {
        let mut cursor = self.lock();
        if cursor.state == CursorState::Fetching {
            cursor.state = if cursor.current.is_some() {
                CursorState::RowReady
            } else {
                CursorState::NotStarted
            };
            self.fetched.notify_all();
        }
    }

    /// Advances a claimed cursor by one row. Runs on a worker thread.
    pub(crate) fn advance(&self) {
        let rows = self.lock().rows.take();
        let (fetched, rows) = match rows {
            Some(mut rows) => {
                let fetched = rows.next_row();
                (fetched, Some(rows))
            }
            None => (Ok(None), None),
        };

        let mut cursor = self.lock();
        cursor.apply(fetched, rows);
        self.fetched.notify_all();
    }

    /// Marks a claimed advance as failed without touching the result set.
    pub(crate) fn abort_fetch(&self, err: EngineError) {
        let mut cursor = self.lock();
        if cursor.state == CursorState::Fetching {
            cursor.rows = None;
            cursor.apply(Err(err), None);
            self.fetched.notify_all();
        }
    }

    /// Advances the cursor on the calling thread.
    pub(crate) fn fetch_inline(&self) -> RowFetch {
        match self.claim_fetch() {
            FetchClaim::Busy => return RowFetch::NotDone,
            FetchClaim::Exhausted => return RowFetch::Exhausted,
            FetchClaim::Scheduled => {}
        }
        self.advance();

        let cursor = self.lock();
        match (&cursor.state, &cursor.current) {
            (CursorState::RowReady, Some(row)) => RowFetch::Row(row.to_record()),
            _ => RowFetch::Exhausted,
        }
    }

    /// Waits until no advance is outstanding or `timeout` elapses.
    ///
    /// Returns true when the cursor is settled.
    pub(crate) fn wait_settled(&self, timeout: Option<Duration>) -> bool {
        let cursor = self.lock();
        let cursor = match timeout {
            Some(timeout) => {
                self.fetched
                    .wait_timeout_while(cursor, timeout, |c| c.state == CursorState::Fetching)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
            None => self
                .fetched
                .wait_while(cursor, |c| c.state == CursorState::Fetching)
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
        cursor.state != CursorState::Fetching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::BufferedRows;

    fn opened(rows: Vec<&str>) -> QueryOperation {
        let query = QueryOperation::new("SELECT name FROM users");
        {
            let mut cursor = query.lock();
            let rows = rows.into_iter().map(|r| Row::new(vec![Some(r.to_string())])).collect();
            cursor.columns = vec!["name".to_string()];
            cursor.rows = Some(Box::new(BufferedRows::new(vec!["name".to_string()], rows)));
        }
        query
    }

    #[test]
    fn test_inline_fetch_walks_rows_then_exhausts() {
        let query = opened(vec!["alice", "bob"]);
        assert_eq!(query.cursor_state(), CursorState::NotStarted);
        assert_eq!(query.current_record().unwrap(), None);

        assert_eq!(query.fetch_inline(), RowFetch::Row("alice".to_string()));
        assert_eq!(query.current_record().unwrap(), Some("alice".to_string()));
        assert_eq!(query.fetch_inline(), RowFetch::Row("bob".to_string()));
        assert_eq!(query.fetch_inline(), RowFetch::Exhausted);

        // Exhausted is terminal
        for _ in 0..3 {
            assert_eq!(query.fetch_inline(), RowFetch::Exhausted);
            assert_eq!(query.claim_fetch(), FetchClaim::Exhausted);
            assert_eq!(query.cursor_state(), CursorState::Exhausted);
            assert_eq!(query.current_record().unwrap(), None);
        }
    }

    #[test]
    fn test_second_claim_is_busy() {
        let query = opened(vec!["alice"]);
        assert_eq!(query.claim_fetch(), FetchClaim::Scheduled);
        assert_eq!(query.claim_fetch(), FetchClaim::Busy);
        assert_eq!(query.fetch_inline(), RowFetch::NotDone);
        assert!(matches!(query.current_record(), Err(BgsqlError::InvalidState(_))));
        assert!(!query.wait_settled(Some(Duration::from_millis(5))));

        query.advance();
        assert!(query.wait_settled(Some(Duration::ZERO)));
        assert_eq!(query.cursor_state(), CursorState::RowReady);
        assert_eq!(query.current_record().unwrap(), Some("alice".to_string()));
    }

    #[test]
    fn test_release_claim_restores_state() {
        let query = opened(vec!["alice", "bob"]);
        assert_eq!(query.claim_fetch(), FetchClaim::Scheduled);
        query.release_claim();
        assert_eq!(query.cursor_state(), CursorState::NotStarted);

        query.fetch_inline();
        assert_eq!(query.claim_fetch(), FetchClaim::Scheduled);
        query.release_claim();
        assert_eq!(query.cursor_state(), CursorState::RowReady);
        assert_eq!(query.current_record().unwrap(), Some("alice".to_string()));
    }

    #[test]
    fn test_abort_fetch_exhausts_with_error() {
        let query = opened(vec!["alice"]);
        query.claim_fetch();
        query.abort_fetch(EngineError::new("worker panicked", -1));
        assert_eq!(query.cursor_state(), CursorState::Exhausted);
        assert_eq!(query.fetch_error().unwrap().code, -1);
        assert_eq!(query.fetch_inline(), RowFetch::Exhausted);
    }

    #[test]
    fn test_json_row() {
        let query = opened(vec!["alice"]);
        query.fetch_inline();
        assert_eq!(
            query.current_json().unwrap(),
            Some(serde_json::json!({"name": "alice"}))
        );
        assert_eq!(query.columns(), vec!["name".to_string()]);
    }
}
