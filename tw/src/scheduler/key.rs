//! Queue identity: priority source plus continuation flag

use crate::domain::{Priority, PrioritySignal};

/// Where a queue takes its priority from
///
/// A tagged union, deliberately not a trait object: equality, hashing, and
/// effective-priority computation are all a match over the tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrioritySource {
    /// Fixed priority level
    Static(Priority),
    /// A live signal; compared by signal identity, never by current value
    Dynamic(PrioritySignal),
}

impl PrioritySource {
    /// The source's priority as of right now
    pub fn current_priority(&self) -> Priority {
        match self {
            Self::Static(priority) => *priority,
            Self::Dynamic(signal) => signal.priority(),
        }
    }
}

/// Identity of a task queue inside the scheduler's queue map
///
/// Two keys are the same queue only if their sources match (a Dynamic key
/// whose signal currently equals a Static level is still a different queue)
/// and their continuation flags match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub source: PrioritySource,
    pub is_continuation: bool,
}

impl QueueKey {
    pub fn new(source: PrioritySource, is_continuation: bool) -> Self {
        Self { source, is_continuation }
    }

    /// Effective priority rank from the source's *current* level
    ///
    /// Dynamic queues cache their level scheduler-side; this reads the live
    /// signal and is used at admission time, when the two agree.
    pub fn effective_priority(&self) -> u8 {
        effective_priority(self.source.current_priority(), self.is_continuation)
    }
}

/// Cross-queue comparison rank, 0 (lowest) through 5 (highest)
///
/// Continuations rank just above fresh tasks of the same level but below
/// fresh tasks of the next level up: a continuation never jumps a priority
/// class.
///
/// | level        | fresh | continuation |
/// |--------------|-------|--------------|
/// | Background   | 0     | 1            |
/// | UserVisible  | 2     | 3            |
/// | UserBlocking | 4     | 5            |
pub(crate) fn effective_priority(priority: Priority, is_continuation: bool) -> u8 {
    priority.ordinal() * 2 + u8::from(is_continuation)
}
