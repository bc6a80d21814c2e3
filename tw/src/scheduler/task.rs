//! Task - one deferred unit of work

use serde_json::Value;
use thiserror::Error;

use crate::domain::Priority;

use super::completion::CompletionHandle;
use super::key::{PrioritySource, QueueKey};

/// Failure produced by a task callback
#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// Ordinary failure; rejected on the task's completion handle
    #[error("callback error: {0}")]
    Caught(Value),

    /// Fatal-class failure; never settled on the completion handle,
    /// re-propagated to the host's fatal path instead
    #[error("uncatchable callback error: {0}")]
    Uncatchable(Value),
}

/// The work a task performs when it runs
///
/// The callback receives the task's priority context for the duration of the
/// call.
pub type TaskCallback = Box<dyn FnOnce(&TaskContext) -> Result<Value, CallbackError>>;

/// Snapshot of the priority source a task was submitted under
///
/// Installed as the scheduler's current context while the task's callback
/// runs, so reentrant `yield_now` calls can inherit the running task's
/// priority source.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub source: PrioritySource,
    pub is_continuation: bool,
}

impl TaskContext {
    /// The context's priority as of right now
    pub fn priority(&self) -> Priority {
        self.source.current_priority()
    }
}

/// Admission state of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SchedulingState {
    /// Not yet handed to the host loop (delayed, or admission still pending)
    NotScheduled,
    /// On the host loop's wake list
    Scheduled,
}

/// A queued unit of work, owned by exactly one queue (or the delayed arena)
/// at a time
pub(crate) struct Task {
    /// Scheduler-wide arrival counter; unique, tie-break key
    pub order: u64,
    /// `None` only for pure yield continuations
    pub callback: Option<TaskCallback>,
    pub completion: CompletionHandle,
    pub state: SchedulingState,
    /// Copy of the owning queue's key, for locating/pruning on removal
    pub key: QueueKey,
    pub context: TaskContext,
}

/// Stale-checkable handle to a queued task
///
/// Returned by [`Scheduler::get_next_task`] and consumed by
/// [`Scheduler::run`]. Holds no live reference into the scheduler: if the
/// task is aborted between selection and run, the handle simply dangles and
/// `run` is a no-op.
///
/// [`Scheduler::get_next_task`]: crate::Scheduler::get_next_task
/// [`Scheduler::run`]: crate::Scheduler::run
#[derive(Debug, Clone)]
pub struct TaskRef {
    pub(crate) key: QueueKey,
    pub(crate) order: u64,
}

impl TaskRef {
    /// Arrival-order counter value of the referenced task
    pub fn enqueue_order(&self) -> u64 {
        self.order
    }
}
