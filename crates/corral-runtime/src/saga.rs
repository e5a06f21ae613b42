//! Compensating actions for multi-step operations.
//!
//! Each completed launch step records how to undo itself. On failure the
//! recorded compensations run newest-first; a compensation that fails is
//! logged and the rest still run, because leaving later steps in place
//! would be worse than a partial cleanup.

use corral_common::error::Result;

type Undo<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// An ordered log of compensations for the steps completed so far.
#[must_use = "a saga must be committed or rolled back"]
pub struct Saga<'a> {
    operation: &'static str,
    steps: Vec<(&'static str, Undo<'a>)>,
}

impl<'a> Saga<'a> {
    /// Starts an empty saga for `operation`.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    /// Records the compensation for a completed step.
    pub fn record(&mut self, step: &'static str, undo: impl FnOnce() -> Result<()> + 'a) {
        tracing::trace!(operation = self.operation, step, "step completed");
        self.steps.push((step, Box::new(undo)));
    }

    /// Number of recorded compensations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no step has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every compensation in reverse order.
    pub fn rollback(self) {
        tracing::warn!(
            operation = self.operation,
            steps = self.steps.len(),
            "rolling back"
        );
        for (step, undo) in self.steps.into_iter().rev() {
            if let Err(e) = undo() {
                tracing::warn!(operation = self.operation, step, error = %e, "compensation failed");
            } else {
                tracing::debug!(operation = self.operation, step, "step compensated");
            }
        }
    }

    /// Discards the compensations; the operation succeeded.
    pub fn commit(self) {
        tracing::trace!(operation = self.operation, steps = self.steps.len(), "committed");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use corral_common::error::CorralError;

    use super::*;

    #[test]
    fn rollback_runs_newest_first() {
        let order = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");
        saga.record("first", || {
            order.borrow_mut().push("first");
            Ok(())
        });
        saga.record("second", || {
            order.borrow_mut().push("second");
            Ok(())
        });
        assert_eq!(saga.len(), 2);
        saga.rollback();
        assert_eq!(*order.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn failing_compensation_does_not_stop_the_rest() {
        let ran = RefCell::new(Vec::new());
        let mut saga = Saga::new("test");
        saga.record("kept", || {
            ran.borrow_mut().push("kept");
            Ok(())
        });
        saga.record("broken", || {
            Err(CorralError::Config {
                message: "boom".into(),
            })
        });
        saga.rollback();
        assert_eq!(*ran.borrow(), vec!["kept"]);
    }

    #[test]
    fn commit_runs_nothing() {
        let ran = RefCell::new(false);
        let mut saga = Saga::new("test");
        saga.record("step", || {
            *ran.borrow_mut() = true;
            Ok(())
        });
        saga.commit();
        assert!(!*ran.borrow());
    }
}
