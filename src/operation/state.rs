/// Operation State Module
///
/// The state machine shared by every asynchronous unit of work. Only the
/// worker executing an operation advances it; any thread may read it.
use crate::core::EngineError;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

/// Longest a fast-path completion check waits for a running operation.
pub const POLL_SLICE: Duration = Duration::from_millis(1);

/// Lifecycle of an operation: Pending → Running → Complete | Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Created and queued, no worker has picked it up yet
    Pending,
    /// A worker owns it
    Running,
    /// Finished successfully
    Complete,
    /// Finished with an engine error
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Complete | OperationState::Failed)
    }
}

#[derive(Debug)]
struct Progress {
    state: OperationState,
    error: Option<EngineError>,
}

/// Shared state core embedded in every operation.
#[derive(Debug)]
pub struct OperationStatus {
    progress: Mutex<Progress>,
    changed: Condvar,
    created_at: Instant,
}

impl OperationStatus {
    pub fn new() -> Self {
        OperationStatus {
            progress: Mutex::new(Progress {
                state: OperationState::Pending,
                error: None,
            }),
            changed: Condvar::new(),
            created_at: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        // Progress is only ever assigned whole, so a poisoned lock still holds a valid value.
        self.progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> OperationState {
        self.lock().state
    }

    pub fn error(&self) -> Option<EngineError> {
        self.lock().error.clone()
    }

    /// Time since the operation was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Reports whether the operation reached a terminal state.
    ///
    /// With `block`, a running operation gets one `POLL_SLICE` to finish
    /// before the answer is given.
    pub fn is_complete(&self, block: bool) -> bool {
        let progress = self.lock();
        if progress.state.is_terminal() || !block || progress.state != OperationState::Running {
            return progress.state.is_terminal();
        }
        let (progress, _) = self
            .changed
            .wait_timeout_while(progress, POLL_SLICE, |p| !p.state.is_terminal())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        progress.state.is_terminal()
    }

    /// Waits until the operation is terminal or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns the state observed last.
    pub fn wait(&self, timeout: Option<Duration>) -> OperationState {
        let progress = self.lock();
        let progress = match timeout {
            Some(timeout) => {
                self.changed
                    .wait_timeout_while(progress, timeout, |p| !p.state.is_terminal())
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0
            }
            None => self
                .changed
                .wait_while(progress, |p| !p.state.is_terminal())
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        };
        progress.state
    }

    /// Pending → Running. Returns false if the operation was already started.
    pub(crate) fn start(&self) -> bool {
        let mut progress = self.lock();
        if progress.state != OperationState::Pending {
            warn!("Refusing to start operation in state {:?}", progress.state);
            return false;
        }
        progress.state = OperationState::Running;
        self.changed.notify_all();
        true
    }

    /// Running → Complete or Failed.
    pub(crate) fn finish(&self, outcome: Result<(), EngineError>) {
        let mut progress = self.lock();
        if progress.state != OperationState::Running {
            warn!("Refusing to finish operation in state {:?}", progress.state);
            return;
        }
        match outcome {
            Ok(()) => progress.state = OperationState::Complete,
            Err(err) => {
                progress.state = OperationState::Failed;
                progress.error = Some(err);
            }
        }
        self.changed.notify_all();
    }
}

impl Default for OperationStatus {
    fn default() -> Self {
        Self::new()
    }
}
