//! taskweave - cooperative priority-based task scheduling
//!
//! taskweave multiplexes independently submitted units of work onto a single
//! logical executor. It decides *what* runs next and *when* work becomes
//! eligible; the surrounding host loop does the actual running.
//!
//! # Guarantees
//!
//! - **Priority first**: higher effective priority is always dispatched
//!   before lower, with continuations ranked just above fresh tasks of the
//!   same level.
//! - **FIFO within a tier**: tasks of equal effective priority run in
//!   submission order, even when partitioned across queues.
//! - **Dynamic priorities**: a [`PrioritySignal`] retargets its queues in
//!   place; no task ever moves or requeues on a priority change.
//! - **Race-safe abort**: firing an [`AbortSignal`] synchronously removes a
//!   queued task and rejects its completion; a task that already started is
//!   untouched.
//! - **Delayed admission**: a delay defers a task through the timer service,
//!   after which it takes the normal admission path.
//!
//! # Modules
//!
//! - [`domain`] - priority levels, priority signals, abort signals
//! - [`scheduler`] - queues, tasks, selection, delayed admission
//! - [`host`] - traits the surrounding execution loop implements

pub mod domain;
pub mod host;
pub mod scheduler;

// Re-export commonly used types
pub use domain::{AbortSignal, Priority, PriorityObserver, PrioritySignal};
pub use host::{HostLoop, TimerService};
pub use scheduler::{
    CallbackError, CompletionHandle, CompletionResult, FatalError, PostOptions, PrioritySource,
    QueueKey, ScheduleError, Scheduler, SchedulerConfig, SchedulerStats, TaskCallback, TaskContext,
    TaskRef, YieldOptions,
};
