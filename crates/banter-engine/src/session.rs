//! Single-flight run tracking and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("a script is already running")]
pub struct AlreadyRunning;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

/// Shared flag polled by long-running work. Once cancelled it stays
/// cancelled until the owning session begins a new run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out of the current operation if a cancel was requested.
    pub fn ensure_active(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Tracks whether a script run is in flight and owns its cancel token.
///
/// `begin` fails fast when a run is already active; the returned guard
/// clears the running flag on drop, so early returns and panics both
/// leave the session ready for the next run.
#[derive(Debug, Default)]
pub struct ExecutionSession {
    running: AtomicBool,
    token: CancelToken,
}

impl ExecutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Result<RunGuard<'_>, AlreadyRunning> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AlreadyRunning);
        }
        self.token.reset();
        Ok(RunGuard { session: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cancellation of the run in flight, if any. The run winds
    /// down cooperatively; this never reports an error to the caller.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

pub struct RunGuard<'a> {
    session: &'a ExecutionSession,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.session.running.store(false, Ordering::SeqCst);
    }
}
