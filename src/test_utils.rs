/// # Test Utilities Module
///
/// Scripted native driver for exercising the concurrency core without a
/// database server. It can:
/// - delay connects, statements and row fetches
/// - fail connects or specific statements with engine errors
/// - panic inside the handshake
/// - record how many native calls run at once
use crate::core::db::{ConnectParams, Driver, NativeHandle, ResultSet, Row};
use crate::core::EngineError;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Installs a test-writer tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    connects: AtomicUsize,
    rows_fetched: AtomicUsize,
}

/// Marks one native call as running for as long as it lives.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    connect_delay: Duration,
    execute_delay: Duration,
    fetch_delay: Duration,
    connect_failure: Option<EngineError>,
    panic_on_connect: bool,
    results: HashMap<String, Vec<Row>>,
    failures: HashMap<String, EngineError>,
}

/// In-process driver whose behaviour is set up by the test.
///
/// Clones share their counters.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDriver {
    script: Script,
    counters: Arc<Counters>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.script.connect_delay = delay;
        self
    }

    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.script.execute_delay = delay;
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.script.fetch_delay = delay;
        self
    }

    pub fn fail_connect(mut self, message: &str, code: i32) -> Self {
        self.script.connect_failure = Some(EngineError::new(message, code));
        self
    }

    pub fn panic_on_connect(mut self) -> Self {
        self.script.panic_on_connect = true;
        self
    }

    /// Single-column rows returned for `statement`.
    pub fn with_rows(mut self, statement: &str, values: &[&str]) -> Self {
        let rows = values.iter().map(|v| Row::new(vec![Some(v.to_string())])).collect();
        self.script.results.insert(statement.to_string(), rows);
        self
    }

    pub fn fail_statement(mut self, statement: &str, message: &str, code: i32) -> Self {
        self.script
            .failures
            .insert(statement.to_string(), EngineError::new(message, code));
        self
    }

    /// Native calls running right now.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of native calls ever running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Row fetch calls made against result sets.
    pub fn rows_fetched(&self) -> usize {
        self.counters.rows_fetched.load(Ordering::SeqCst)
    }
}

impl Driver for ScriptedDriver {
    fn connect(&self, _params: &ConnectParams) -> Result<Box<dyn NativeHandle>, EngineError> {
        let _call = InFlight::enter(&self.counters);
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.script.connect_delay);
        if self.script.panic_on_connect {
            panic!("scripted handshake panic");
        }
        if let Some(err) = &self.script.connect_failure {
            return Err(err.clone());
        }
        Ok(Box::new(ScriptedHandle {
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct ScriptedHandle {
    script: Script,
    counters: Arc<Counters>,
}

impl NativeHandle for ScriptedHandle {
    fn execute(&mut self, sql: &str) -> Result<Box<dyn ResultSet>, EngineError> {
        let _call = InFlight::enter(&self.counters);
        thread::sleep(self.script.execute_delay);
        if let Some(err) = self.script.failures.get(sql) {
            return Err(err.clone());
        }
        let rows = self.script.results.get(sql).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedRows {
            columns: vec!["value".to_string()],
            rows: rows.into(),
            fetch_delay: self.script.fetch_delay,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn escape(&self, text: &str) -> String {
        text.replace('\'', "''")
    }
}

struct ScriptedRows {
    columns: Vec<String>,
    rows: VecDeque<Row>,
    fetch_delay: Duration,
    counters: Arc<Counters>,
}

impl ResultSet for ScriptedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>, EngineError> {
        let _call = InFlight::enter(&self.counters);
        self.counters.rows_fetched.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.fetch_delay);
        Ok(self.rows.pop_front())
    }
}
