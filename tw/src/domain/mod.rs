//! Domain types for taskweave
//!
//! Leaf value types shared across the scheduler: the closed priority level
//! set, the observable PrioritySignal, and the AbortSignal cancellation
//! handle. These are pure data/notification objects; none of them fail.

mod abort;
mod priority;
mod signal;

pub use abort::AbortSignal;
pub use priority::Priority;
pub use signal::{PriorityObserver, PrioritySignal};
