/// Worker Pool Module
///
/// Each connection owns one `WorkerPool`: a fixed set of OS threads pulling
/// jobs from an unbounded FIFO channel. Submission never blocks and never
/// rejects because every worker is busy; jobs simply queue.
use crate::connection::NativeSession;
use crate::core::{BgsqlError, Result};
use crate::operation::Operation;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

const RELEASED: &str = "Connection released before the operation started";

/// Unit of work executed by a worker thread.
pub(crate) enum Job {
    /// Run an operation's blocking work
    Execute(Arc<Operation>),
    /// Advance a query's row cursor by one row
    FetchRow(Arc<Operation>),
}

/// Concurrency counters of a pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    running: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl PoolStats {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Jobs executing right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of jobs ever executing at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Jobs finished since the pool started.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

struct Worker {
    receiver: Receiver<Job>,
    session: Arc<NativeSession>,
    closing: Arc<AtomicBool>,
    stats: Arc<PoolStats>,
}

impl Worker {
    fn run(self) {
        while let Ok(job) = self.receiver.recv() {
            self.stats.enter();
            self.handle(job);
            self.stats.leave();
        }
    }

    fn handle(&self, job: Job) {
        let closing = self.closing.load(Ordering::Acquire);
        match job {
            Job::Execute(op) if closing => op.abandon(RELEASED),
            Job::Execute(op) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| op.run(&self.session))) {
                    let reason = panic_message(payload.as_ref());
                    error!("Worker panicked while running operation: {}", reason);
                    op.recover(&reason);
                }
            }
            Job::FetchRow(op) if closing => op.abort_fetch(RELEASED),
            Job::FetchRow(op) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| op.advance_cursor())) {
                    let reason = panic_message(payload.as_ref());
                    error!("Worker panicked while fetching a row: {}", reason);
                    op.abort_fetch(&reason);
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("Worker panicked: {}", message)
    } else {
        "Worker panicked".to_string()
    }
}

/// Fixed-size set of worker threads serving one connection.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    closing: Arc<AtomicBool>,
    stats: Arc<PoolStats>,
    thread_limit: usize,
}

impl WorkerPool {
    /// Spawns `thread_limit` workers sharing `session`.
    ///
    /// If the worker table cannot be allocated or any thread fails to spawn,
    /// the threads already started are joined and `ResourceExhausted` is returned.
    pub(crate) fn new(thread_limit: usize, session: Arc<NativeSession>) -> Result<Self> {
        let mut workers = Vec::new();
        workers.try_reserve_exact(thread_limit).map_err(|e| {
            BgsqlError::ResourceExhausted(format!("Cannot allocate {} worker threads: {}", thread_limit, e))
        })?;

        let (sender, receiver) = unbounded();
        let mut pool = WorkerPool {
            sender: Some(sender),
            workers,
            closing: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PoolStats::default()),
            thread_limit,
        };

        for index in 0..thread_limit {
            let worker = Worker {
                receiver: receiver.clone(),
                session: Arc::clone(&session),
                closing: Arc::clone(&pool.closing),
                stats: Arc::clone(&pool.stats),
            };
            let handle = thread::Builder::new()
                .name(format!("bgsql-worker-{}", index))
                .spawn(move || worker.run())
                .map_err(|e| BgsqlError::ResourceExhausted(format!("Failed to spawn worker thread: {}", e)))?;
            pool.workers.push(handle);
        }

        debug!("Started worker pool with {} threads", thread_limit);
        Ok(pool)
    }

    /// Queues a job. Never blocks; fails only once the pool is shut down.
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        let closed = || BgsqlError::ResourceExhausted("Worker pool is shut down".to_string());
        let sender = self.sender.as_ref().ok_or_else(closed)?;
        sender.send(job).map_err(|_| closed())
    }

    pub fn thread_limit(&self) -> usize {
        self.thread_limit
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    /// Stops accepting jobs, lets running jobs finish, fails queued operations
    /// that never started and joins every worker.
    pub(crate) fn shutdown(&mut self) {
        if self.sender.is_none() {
            return;
        }
        self.closing.store(true, Ordering::Release);
        self.sender = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Worker thread exited abnormally");
            }
        }
        debug!("Worker pool stopped after {} jobs", self.stats.completed());
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
