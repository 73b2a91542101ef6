//! Rollback stack of named release actions
//!
//! Each acquisition step pushes the action that undoes it. If a later step
//! fails, the stack unwinds immediately in reverse order. If every step
//! succeeds, the same stack becomes the owner's teardown sequence.

use crate::error::TransportError;
use tracing::{debug, warn};

type ReleaseAction = Box<dyn FnOnce() -> Result<(), TransportError> + Send>;

/// Ordered release actions, run last-in first-out
#[derive(Default)]
pub struct RollbackStack {
    actions: Vec<(&'static str, ReleaseAction)>,
}

impl RollbackStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the action that releases the resource just acquired
    pub fn push<F>(&mut self, name: &'static str, action: F)
    where
        F: FnOnce() -> Result<(), TransportError> + Send + 'static,
    {
        self.actions.push((name, Box::new(action)));
    }

    /// Names of the pending actions, in acquisition order
    pub fn names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action in reverse order
    ///
    /// Each action is best-effort: a failure is logged and the remaining
    /// actions still run. Returns the number of failed actions.
    pub fn unwind(&mut self) -> usize {
        let mut failures = 0;
        while let Some((name, action)) = self.actions.pop() {
            match action() {
                Ok(()) => debug!("Released {}", name),
                Err(e) => {
                    warn!("Failed to release {}: {}", name, e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

impl Drop for RollbackStack {
    fn drop(&mut self) {
        self.unwind();
    }
}

impl std::fmt::Debug for RollbackStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackStack")
            .field("actions", &self.names())
            .finish()
    }
}
