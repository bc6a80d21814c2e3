//! PrioritySignal - observable, mutable priority with dependent notification

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use tracing::debug;

use super::priority::Priority;

/// Observer notified when a [`PrioritySignal`]'s priority changes
///
/// Schedulers implement this to refresh the cached priority of queues keyed
/// by the signal. Notification is synchronous: it completes before
/// [`PrioritySignal::set_priority`] returns.
pub trait PriorityObserver {
    /// React to a priority change on `signal`
    fn on_priority_changed(&self, signal: &PrioritySignal);
}

struct SignalInner {
    priority: Priority,
    dependents: Vec<Weak<dyn PriorityObserver>>,
}

/// A mutable, observable priority value
///
/// Cloning produces another handle to the same signal; equality and hashing
/// are by signal identity, never by current value. Many tasks and schedulers
/// may hold handles concurrently; mutation happens only through
/// [`set_priority`](Self::set_priority), which notifies every live dependent
/// before returning.
#[derive(Clone)]
pub struct PrioritySignal {
    inner: Rc<RefCell<SignalInner>>,
}

impl PrioritySignal {
    /// Create a new signal at the given priority
    pub fn new(priority: Priority) -> Self {
        debug!(%priority, "PrioritySignal::new: called");
        Self {
            inner: Rc::new(RefCell::new(SignalInner {
                priority,
                dependents: Vec::new(),
            })),
        }
    }

    /// Current priority of this signal
    pub fn priority(&self) -> Priority {
        self.inner.borrow().priority
    }

    /// Set the priority and synchronously notify every live dependent
    ///
    /// Notification is not short-circuited on an equal value: dependents may
    /// rely on the change callback firing even when the level is unchanged.
    pub fn set_priority(&self, priority: Priority) {
        debug!(%priority, "PrioritySignal::set_priority: called");
        let live: Vec<Rc<dyn PriorityObserver>> = {
            let mut inner = self.inner.borrow_mut();
            inner.priority = priority;
            // Drop dead dependents while collecting the live ones.
            inner.dependents.retain(|weak| weak.upgrade().is_some());
            inner.dependents.iter().filter_map(Weak::upgrade).collect()
        };
        // Borrow released: observers may read this signal or reenter the
        // scheduler from the callback.
        for observer in live {
            observer.on_priority_changed(self);
        }
    }

    /// Register an observer to be notified on priority changes
    ///
    /// Registering the same observer twice is harmless; the duplicate is
    /// dropped here.
    pub fn register_dependent(&self, observer: &Rc<dyn PriorityObserver>) {
        let mut inner = self.inner.borrow_mut();
        let already = inner
            .dependents
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|live| Rc::ptr_eq(&live, observer)));
        if !already {
            inner.dependents.push(Rc::downgrade(observer));
        }
    }

    /// Number of live dependents (dead weak references excluded)
    pub fn dependent_count(&self) -> usize {
        self.inner
            .borrow()
            .dependents
            .iter()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }
}

impl PartialEq for PrioritySignal {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PrioritySignal {}

impl Hash for PrioritySignal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl std::fmt::Debug for PrioritySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrioritySignal")
            .field("priority", &self.priority())
            .field("id", &(Rc::as_ptr(&self.inner) as usize))
            .finish()
    }
}
