//! Boundary traits for the host execution loop and timer service
//!
//! The scheduler decides *what* runs next and *when* it becomes eligible; it
//! never runs callbacks on its own. The surrounding host implements these
//! traits: an execution loop that polls [`Scheduler::get_next_task`] and
//! invokes [`Scheduler::run`], and a clock that fires delayed-admission
//! deadlines.
//!
//! [`Scheduler::get_next_task`]: crate::Scheduler::get_next_task
//! [`Scheduler::run`]: crate::Scheduler::run

use std::time::Duration;

/// The host execution loop consumed by a scheduler
pub trait HostLoop {
    /// Ask the host to service the scheduler at some future turn
    ///
    /// `effective_priority` is the rank in `[0, 5]` of the queue that just
    /// gained schedulable work (see [`QueueKey::effective_priority`]).
    /// Returns `false` if the host cannot currently accept the request
    /// (e.g. it is shutting down); the scheduler treats `false` as an
    /// admission failure for the just-submitted task.
    ///
    /// [`QueueKey::effective_priority`]: crate::QueueKey::effective_priority
    fn request_admission(&self, effective_priority: u8) -> bool;
}

/// One-shot timer service consumed by delayed admission
pub trait TimerService {
    /// Arrange for `on_fire` to run once after `delay` has elapsed
    fn schedule_once(&self, delay: Duration, on_fire: Box<dyn FnOnce()>);
}
