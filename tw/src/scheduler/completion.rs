//! CompletionHandle - single-assignment result slot for a task

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use super::error::ScheduleError;

/// The outcome held by a settled completion handle
pub type CompletionResult = Result<Value, ScheduleError>;

/// Single-assignment completion slot handed back from `post`/`yield_now`
///
/// Cloning produces another handle to the same slot. A handle is settled at
/// most once across resolve and reject; a second settlement attempt is a
/// contract violation inside the scheduler and asserts.
#[derive(Clone, Debug, Default)]
pub struct CompletionHandle {
    inner: Rc<RefCell<Option<CompletionResult>>>,
}

impl CompletionHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether the task has finished (ran, failed, or was aborted)
    pub fn is_settled(&self) -> bool {
        self.inner.borrow().is_some()
    }

    /// The settled outcome, or `None` while the task is still pending
    pub fn result(&self) -> Option<CompletionResult> {
        self.inner.borrow().clone()
    }

    pub(crate) fn resolve(&self, value: Value) {
        debug!(%value, "CompletionHandle::resolve: called");
        self.settle(Ok(value));
    }

    pub(crate) fn reject(&self, error: ScheduleError) {
        debug!(%error, "CompletionHandle::reject: called");
        self.settle(Err(error));
    }

    fn settle(&self, result: CompletionResult) {
        let mut slot = self.inner.borrow_mut();
        assert!(slot.is_none(), "completion handle settled twice");
        *slot = Some(result);
    }
}
