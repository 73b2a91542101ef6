//! Cancellation token and single-use completion signal
//!
//! The controller and its reader thread share exactly these two primitives:
//! the controller cancels the token, the reader notices at its next
//! iteration boundary (or while sleeping inside a bounded read), stops, and
//! fires the completion signal once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Cooperative cancellation flag with a wake-up for sleepers
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every thread sleeping in [`wait_timeout`](Self::wait_timeout)
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        // Taking the lock orders the store before any waiter's re-check.
        let _guard = self
            .state
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.state.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`, returning early when cancelled
    ///
    /// Returns whether the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self
            .state
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_cancelled() {
            return true;
        }

        let _ = self
            .state
            .wake
            .wait_timeout_while(guard, timeout, |_| !self.is_cancelled())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct CompletionState {
    /// `Some(true)` once completed, `Some(false)` if the signalling half was
    /// dropped first
    outcome: Mutex<Option<bool>>,
    settled: Condvar,
}

impl CompletionState {
    /// Record the outcome unless one is already recorded
    fn settle(&self, completed: bool) {
        let mut outcome = self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if outcome.is_none() {
            *outcome = Some(completed);
            self.settled.notify_all();
        }
    }
}

/// Create a linked completion pair
pub fn completion_signal() -> (Completion, CompletionWaiter) {
    let state = Arc::new(CompletionState::default());
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            state: state.clone(),
            tx: Some(tx),
        },
        CompletionWaiter { state, rx },
    )
}

/// Signalling half; consumed on use, so it fires at most once
#[derive(Debug)]
pub struct Completion {
    state: Arc<CompletionState>,
    tx: Option<oneshot::Sender<()>>,
}

impl Completion {
    pub fn complete(mut self) {
        self.state.settle(true);
        if let Some(tx) = self.tx.take() {
            // The waiter may already be gone; completion is still final.
            let _ = tx.send(());
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        // No-op after complete()
        self.state.settle(false);
    }
}

/// Waiting half; consumed on use, so exactly one waiter observes the signal
#[derive(Debug)]
pub struct CompletionWaiter {
    state: Arc<CompletionState>,
    rx: oneshot::Receiver<()>,
}

impl CompletionWaiter {
    /// Block until the signal fires
    ///
    /// Returns false if the signalling half was dropped without completing,
    /// e.g. because the thread holding it panicked. Does not depend on an
    /// async runtime, so it is safe on a thread that drives one (the caller
    /// is blocked for as long as the signal takes).
    pub fn wait(self) -> bool {
        let outcome = self
            .state
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let outcome = self
            .state
            .settled
            .wait_while(outcome, |outcome| outcome.is_none())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        outcome.unwrap_or(false)
    }

    pub async fn wait_async(self) -> bool {
        self.rx.await.is_ok()
    }
}
