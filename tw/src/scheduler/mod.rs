//! Cooperative priority scheduler
//!
//! Queue identity, task bookkeeping, cross-queue selection, and timer-gated
//! admission. One [`Scheduler`] per host execution loop.

mod completion;
mod config;
pub(crate) mod core;
mod delay;
mod error;
mod key;
mod queue;
mod task;

pub use completion::{CompletionHandle, CompletionResult};
pub use config::SchedulerConfig;
pub use self::core::{PostOptions, Scheduler, SchedulerStats, YieldOptions};
pub use error::{FatalError, ScheduleError};
pub use key::{PrioritySource, QueueKey};
pub use task::{CallbackError, TaskCallback, TaskContext, TaskRef};
