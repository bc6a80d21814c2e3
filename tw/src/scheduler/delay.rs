//! DelayedAdmission - timer-gated deferral of task admission

use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::debug;

use super::core::SchedulerCore;

/// One pending delayed admission
///
/// Holds only a weak scheduler reference and the task's enqueue order; the
/// task itself stays in the scheduler's delayed arena. Scheduler teardown or
/// task cancellation therefore needs no timer deregistration: a fire against
/// a dead scheduler or a stale order is a no-op.
pub(crate) struct DelayedAdmission {
    scheduler: Weak<SchedulerCore>,
    order: u64,
}

impl DelayedAdmission {
    /// Arm the timer; on fire the task re-enters the normal admission path
    pub(crate) fn arm(core: &Rc<SchedulerCore>, order: u64, delay: Duration) {
        debug!(order, ?delay, "DelayedAdmission::arm: called");
        let pending = DelayedAdmission {
            scheduler: Rc::downgrade(core),
            order,
        };
        core.timer().schedule_once(delay, Box::new(move || pending.fire()));
    }

    fn fire(self) {
        match self.scheduler.upgrade() {
            Some(core) => core.admit_delayed(self.order),
            None => debug!(order = self.order, "DelayedAdmission::fire: scheduler gone, ignoring"),
        }
    }
}
