//! AbortSignal - cancellation signal for queued tasks

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

type AbortCallback = Box<dyn FnOnce(&Value)>;

#[derive(Default)]
struct AbortInner {
    reason: Option<Value>,
    callbacks: Vec<AbortCallback>,
}

/// A one-shot cancellation signal
///
/// Cloning produces another handle to the same signal. Firing is idempotent:
/// the first [`abort`](Self::abort) wins and later calls are no-ops.
/// Callbacks registered after the signal has fired run immediately with the
/// stored reason.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Rc<RefCell<AbortInner>>,
}

impl AbortSignal {
    /// Create a new, unfired signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this signal has fired
    pub fn is_aborted(&self) -> bool {
        self.inner.borrow().reason.is_some()
    }

    /// The abort reason, if the signal has fired
    pub fn reason(&self) -> Option<Value> {
        self.inner.borrow().reason.clone()
    }

    /// Fire the signal with the given reason and run registered callbacks
    ///
    /// The second and later calls are no-ops; the original reason sticks.
    pub fn abort(&self, reason: Value) {
        debug!(%reason, "AbortSignal::abort: called");
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if inner.reason.is_some() {
                debug!("AbortSignal::abort: already aborted, ignoring");
                return;
            }
            inner.reason = Some(reason.clone());
            std::mem::take(&mut inner.callbacks)
        };
        // Borrow released: callbacks may reenter the scheduler or this signal.
        for callback in callbacks {
            callback(&reason);
        }
    }

    /// Register a callback to run when the signal fires
    ///
    /// If the signal has already fired, the callback runs immediately.
    pub fn on_abort(&self, callback: impl FnOnce(&Value) + 'static) {
        let fired = self.inner.borrow().reason.clone();
        match fired {
            Some(reason) => callback(&reason),
            None => self.inner.borrow_mut().callbacks.push(Box::new(callback)),
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.inner.borrow().reason)
            .finish()
    }
}
