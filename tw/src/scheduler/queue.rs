//! TaskQueue - FIFO of tasks sharing one QueueKey

use std::collections::VecDeque;

use crate::domain::Priority;

use super::key::{QueueKey, effective_priority};
use super::task::{SchedulingState, Task};

/// An arrival-ordered queue of tasks sharing a [`QueueKey`]
///
/// Removal can happen from anywhere in the queue (abort, admission failure),
/// not just the front. The priority is cached here and, for dynamic keys,
/// refreshed by the scheduler when the signal notifies a change; it is never
/// read from the signal on the hot selection path.
pub(crate) struct TaskQueue {
    key: QueueKey,
    priority: Priority,
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    /// Create an empty queue, caching the key's current priority
    pub fn new(key: QueueKey) -> Self {
        let priority = key.source.current_priority();
        Self {
            key,
            priority,
            tasks: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    /// Refresh the cached priority after a signal change; no task movement
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Cross-queue comparison rank from the cached priority
    pub fn effective_priority(&self) -> u8 {
        effective_priority(self.priority, self.key.is_continuation)
    }

    pub fn push(&mut self, task: Task) {
        debug_assert!(task.key == self.key, "task appended to the wrong queue");
        self.tasks.push_back(task);
    }

    /// Detach the task with the given enqueue order, wherever it sits
    pub fn remove(&mut self, order: u64) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.order == order)?;
        self.tasks.remove(index)
    }

    /// Enqueue order of the earliest task already admitted to the host loop
    pub fn earliest_scheduled_order(&self) -> Option<u64> {
        self.tasks
            .iter()
            .find(|task| task.state == SchedulingState::Scheduled)
            .map(|task| task.order)
    }

    /// Mark the task with the given order as admitted
    pub fn mark_scheduled(&mut self, order: u64) -> bool {
        match self.tasks.iter_mut().find(|task| task.order == order) {
            Some(task) => {
                task.state = SchedulingState::Scheduled;
                true
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
