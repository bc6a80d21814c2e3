//! Scheduler error taxonomy

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced through a task's completion handle
///
/// All of these are recoverable: they never crash the scheduler, never leave
/// a queue dangling, and never leave a completion unsettled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    /// The task's abort signal fired, either before submission or while the
    /// task was still queued
    #[error("task aborted: {reason}")]
    Aborted { reason: Value },

    /// The host execution loop declined the admission request
    #[error("host loop refused the admission request")]
    AdmissionRefused,

    /// The scheduler has been disconnected from its host
    #[error("scheduler is disconnected from its host")]
    HostUnavailable,

    /// The task's callback returned an ordinary (catchable) failure
    #[error("task callback failed: {reason}")]
    CallbackFailed { reason: Value },
}

impl ScheduleError {
    /// Whether this rejection came from the abort path
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Whether the submission itself was refused (as opposed to the task
    /// running and failing)
    pub fn is_admission_failure(&self) -> bool {
        matches!(self, Self::AdmissionRefused | Self::HostUnavailable)
    }
}

/// An uncatchable callback failure
///
/// Not settled on the completion handle; returned from
/// [`Scheduler::run`](crate::Scheduler::run) so the host can take its own
/// fatal-error path. By the time this is raised the task has already been
/// detached and its queue pruned.
#[derive(Debug, Clone, Error)]
#[error("uncatchable callback failure: {reason}")]
pub struct FatalError {
    pub reason: Value,
}
