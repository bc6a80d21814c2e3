//! Scheduler implementation

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{AbortSignal, Priority, PriorityObserver, PrioritySignal};
use crate::host::{HostLoop, TimerService};

use super::completion::CompletionHandle;
use super::config::SchedulerConfig;
use super::delay::DelayedAdmission;
use super::error::{FatalError, ScheduleError};
use super::key::{PrioritySource, QueueKey, effective_priority};
use super::queue::TaskQueue;
use super::task::{CallbackError, SchedulingState, Task, TaskCallback, TaskContext, TaskRef};

/// Options for [`Scheduler::post`]
///
/// An explicit `priority` silently overrides `signal` for queue selection;
/// with neither, the scheduler's configured default applies.
#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    pub priority: Option<Priority>,
    pub signal: Option<PrioritySignal>,
    pub delay: Option<Duration>,
    pub abort: Option<AbortSignal>,
}

/// Options for [`Scheduler::yield_now`]
///
/// With no explicit `signal`, the continuation inherits the priority source
/// of the task currently running on this scheduler, falling back to the
/// configured default outside a task.
#[derive(Debug, Clone, Default)]
pub struct YieldOptions {
    pub signal: Option<PrioritySignal>,
    pub abort: Option<AbortSignal>,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    pub total_posted: u64,
    pub total_yielded: u64,
    pub total_ran: u64,
    pub total_aborted: u64,
    pub total_admission_refused: u64,
    pub peak_queue_count: usize,
}

/// Internal state behind the scheduler's RefCell
///
/// Owns every queue and every task by value; external code addresses tasks
/// only through key + enqueue-order handles.
struct SchedulerInner {
    /// Queue map; a queue exists here iff it holds at least one task
    queues: HashMap<QueueKey, TaskQueue>,

    /// Tasks awaiting delayed admission, keyed by enqueue order; never
    /// simultaneously present in a queue
    delayed: HashMap<u64, Task>,

    /// Scheduler-wide arrival counter
    next_order: u64,

    /// Priority context of the task currently running, if any
    current_context: Option<TaskContext>,

    /// Set once the scheduler is torn down; submissions reject afterwards
    disconnected: bool,

    /// Statistics
    stats: SchedulerStats,
}

impl SchedulerInner {
    /// Append a task to its queue (creating the queue on demand) and return
    /// the queue's effective priority for the admission request
    fn enqueue(&mut self, task: Task) -> u8 {
        let key = task.key.clone();
        let queue = self
            .queues
            .entry(key)
            .or_insert_with_key(|k| TaskQueue::new(k.clone()));
        queue.push(task);
        let tier = queue.effective_priority();
        if self.queues.len() > self.stats.peak_queue_count {
            self.stats.peak_queue_count = self.queues.len();
        }
        tier
    }

    /// Drop the queue for `key` if it holds zero tasks
    ///
    /// Invoked after every removal so that no empty queue survives a turn.
    fn prune_if_empty(&mut self, key: &QueueKey) {
        if self.queues.get(key).is_some_and(TaskQueue::is_empty) {
            self.queues.remove(key);
        }
    }
}

/// Shared core behind cloneable [`Scheduler`] handles
///
/// Single-threaded and reentrancy-safe: the RefCell borrow is always released
/// before control reaches user code (callbacks, abort handlers, the host).
pub(crate) struct SchedulerCore {
    host: Rc<dyn HostLoop>,
    timer: Rc<dyn TimerService>,
    config: SchedulerConfig,
    inner: RefCell<SchedulerInner>,
}

impl SchedulerCore {
    pub(crate) fn timer(&self) -> &dyn TimerService {
        self.timer.as_ref()
    }

    /// Ask the host to service a just-enqueued task; on refusal, detach the
    /// task and reject its completion
    pub(crate) fn finish_admission(&self, key: &QueueKey, order: u64, tier: u8) {
        debug!(order, tier, "Scheduler::finish_admission: requesting admission");
        // No borrow held across the host call: it may reenter the scheduler.
        let granted = self.host.request_admission(tier);
        if granted {
            let mut inner = self.inner.borrow_mut();
            let marked = inner
                .queues
                .get_mut(key)
                .is_some_and(|queue| queue.mark_scheduled(order));
            if !marked {
                // Aborted while the host considered the request.
                debug!(order, "Scheduler::finish_admission: task gone before scheduling");
            }
        } else {
            warn!(order, "Scheduler::finish_admission: host refused admission");
            let removed = {
                let mut inner = self.inner.borrow_mut();
                let removed = inner.queues.get_mut(key).and_then(|queue| queue.remove(order));
                inner.prune_if_empty(key);
                if removed.is_some() {
                    inner.stats.total_admission_refused += 1;
                }
                removed
            };
            if let Some(task) = removed {
                task.completion.reject(ScheduleError::AdmissionRefused);
            }
        }
    }

    /// Detach a task wherever it lives (queue or delayed arena) and reject
    /// its completion with the abort reason
    ///
    /// A task already run or already cancelled is a logged no-op: abort wins
    /// every race exactly once.
    pub(crate) fn cancel_task(&self, key: &QueueKey, order: u64, reason: Value) {
        debug!(order, %reason, "Scheduler::cancel_task: called");
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let mut removed = inner.queues.get_mut(key).and_then(|queue| queue.remove(order));
            if removed.is_none() {
                removed = inner.delayed.remove(&order);
            }
            inner.prune_if_empty(key);
            if removed.is_some() {
                inner.stats.total_aborted += 1;
            }
            removed
        };
        match removed {
            Some(task) => task.completion.reject(ScheduleError::Aborted { reason }),
            None => debug!(order, "Scheduler::cancel_task: task already gone, no-op"),
        }
    }

    /// Move a delayed task into its queue once its timer has fired, then
    /// proceed exactly as immediate admission
    pub(crate) fn admit_delayed(&self, order: u64) {
        debug!(order, "Scheduler::admit_delayed: timer fired");
        let admitted = {
            let mut inner = self.inner.borrow_mut();
            match inner.delayed.remove(&order) {
                Some(task) => {
                    let key = task.key.clone();
                    let tier = inner.enqueue(task);
                    Some((key, tier))
                }
                None => None,
            }
        };
        match admitted {
            Some((key, tier)) => self.finish_admission(&key, order, tier),
            // Aborted or disconnected while the timer was pending.
            None => debug!(order, "Scheduler::admit_delayed: stale order, ignoring"),
        }
    }
}

impl PriorityObserver for SchedulerCore {
    /// Refresh the cached priority of every queue keyed by `signal`
    ///
    /// Tasks never move between queues on a priority change; only the
    /// queues' effective priority is recomputed from here on.
    fn on_priority_changed(&self, signal: &PrioritySignal) {
        let priority = signal.priority();
        debug!(%priority, "Scheduler::on_priority_changed: called");
        let mut inner = self.inner.borrow_mut();
        for is_continuation in [false, true] {
            let key = QueueKey::new(PrioritySource::Dynamic(signal.clone()), is_continuation);
            if let Some(queue) = inner.queues.get_mut(&key) {
                queue.set_priority(priority);
            }
        }
    }
}

/// Cooperative priority scheduler for one host execution loop
///
/// Owns a map from [`QueueKey`] to task queue, hands out completion handles
/// on submission, and picks the next runnable task on demand. Cloning
/// produces another handle to the same scheduler, which is how callbacks
/// reenter it.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<SchedulerCore>,
}

impl Scheduler {
    /// Create a scheduler bound to a host loop and timer service
    pub fn new(host: Rc<dyn HostLoop>, timer: Rc<dyn TimerService>, config: SchedulerConfig) -> Self {
        debug!(?config, "Scheduler::new: called");
        Self {
            core: Rc::new(SchedulerCore {
                host,
                timer,
                config,
                inner: RefCell::new(SchedulerInner {
                    queues: HashMap::new(),
                    delayed: HashMap::new(),
                    next_order: 0,
                    current_context: None,
                    disconnected: false,
                    stats: SchedulerStats::default(),
                }),
            }),
        }
    }

    /// Submit a callback for execution
    ///
    /// Returns a completion handle that settles exactly once: with the
    /// callback's value once it runs, or with a rejection if the task is
    /// aborted or admission fails.
    pub fn post(&self, callback: TaskCallback, options: PostOptions) -> CompletionHandle {
        let PostOptions { priority, signal, delay, abort } = options;
        debug!(?priority, ?delay, "Scheduler::post: called");
        let source = match (priority, signal) {
            // Design choice pending product confirmation: an explicit level
            // silently overrides the signal for queue selection.
            (Some(level), _) => PrioritySource::Static(level),
            (None, Some(signal)) => PrioritySource::Dynamic(signal),
            (None, None) => PrioritySource::Static(self.core.config.default_priority),
        };
        self.submit(Some(callback), source, false, delay.unwrap_or(Duration::ZERO), abort)
    }

    /// Submit a pure continuation: yield control and resume later
    ///
    /// The continuation has no user callback; its completion resolves with
    /// `null` when it reaches the front. It runs before fresh tasks of the
    /// same priority but never jumps a priority class.
    pub fn yield_now(&self, options: YieldOptions) -> CompletionHandle {
        let YieldOptions { signal, abort } = options;
        debug!("Scheduler::yield_now: called");
        let source = match signal {
            Some(signal) => PrioritySource::Dynamic(signal),
            None => match self.core.inner.borrow().current_context.clone() {
                Some(context) => context.source,
                None => PrioritySource::Static(self.core.config.default_priority),
            },
        };
        self.submit(None, source, true, Duration::ZERO, abort)
    }

    fn submit(
        &self,
        callback: Option<TaskCallback>,
        source: PrioritySource,
        is_continuation: bool,
        delay: Duration,
        abort: Option<AbortSignal>,
    ) -> CompletionHandle {
        let core = &self.core;
        let completion = CompletionHandle::new();

        if core.inner.borrow().disconnected {
            warn!("Scheduler::submit: scheduler disconnected, rejecting");
            completion.reject(ScheduleError::HostUnavailable);
            return completion;
        }
        if let Some(abort) = &abort {
            if let Some(reason) = abort.reason() {
                debug!(%reason, "Scheduler::submit: abort signal already fired, rejecting");
                completion.reject(ScheduleError::Aborted { reason });
                return completion;
            }
        }

        if let PrioritySource::Dynamic(signal) = &source {
            let observer: Rc<dyn PriorityObserver> = core.clone();
            signal.register_dependent(&observer);
        }

        let key = QueueKey::new(source.clone(), is_continuation);
        let context = TaskContext { source, is_continuation };

        let order = {
            let mut inner = core.inner.borrow_mut();
            let order = inner.next_order;
            inner.next_order += 1;
            if is_continuation {
                inner.stats.total_yielded += 1;
            } else {
                inner.stats.total_posted += 1;
            }
            order
        };

        let task = Task {
            order,
            callback,
            completion: completion.clone(),
            state: SchedulingState::NotScheduled,
            key: key.clone(),
            context,
        };

        if let Some(abort) = &abort {
            let weak = Rc::downgrade(core);
            let abort_key = key.clone();
            abort.on_abort(move |reason| {
                if let Some(core) = weak.upgrade() {
                    core.cancel_task(&abort_key, order, reason.clone());
                }
            });
        }

        if delay > Duration::ZERO {
            debug!(order, ?delay, "Scheduler::submit: deferring admission");
            core.inner.borrow_mut().delayed.insert(order, task);
            DelayedAdmission::arm(core, order, delay);
        } else {
            let tier = core.inner.borrow_mut().enqueue(task);
            core.finish_admission(&key, order, tier);
        }

        completion
    }

    /// Pick the next task the host loop should run, without detaching it
    ///
    /// Among queues holding at least one scheduled task: highest effective
    /// priority wins, ties broken by the smallest enqueue order of each
    /// queue's earliest scheduled task. Deterministic; `None` when nothing
    /// is schedulable.
    pub fn get_next_task(&self) -> Option<TaskRef> {
        let inner = self.core.inner.borrow();
        let mut best: Option<(u8, u64, &TaskQueue)> = None;
        for queue in inner.queues.values() {
            let Some(order) = queue.earliest_scheduled_order() else {
                continue;
            };
            let tier = queue.effective_priority();
            let better = match best {
                None => true,
                Some((best_tier, best_order, _)) => {
                    tier > best_tier || (tier == best_tier && order < best_order)
                }
            };
            if better {
                best = Some((tier, order, queue));
            }
        }
        best.map(|(tier, order, queue)| {
            debug!(order, tier, "Scheduler::get_next_task: selected");
            TaskRef {
                key: queue.key().clone(),
                order,
            }
        })
    }

    /// Run a task previously selected by [`get_next_task`](Self::get_next_task)
    ///
    /// Detaches the task and prunes its queue before any user code runs, so
    /// reentrant calls never observe a half-removed task. `Ok(())` tells the
    /// host to keep processing; `Err` is an uncatchable callback failure the
    /// host must treat as fatal (the completion handle is deliberately left
    /// unsettled in that case).
    ///
    /// A stale handle (the task was aborted after selection) is a no-op:
    /// abort always wins the race.
    pub fn run(&self, task: TaskRef) -> Result<(), FatalError> {
        debug!(order = task.order, "Scheduler::run: called");
        let (detached, prev_context) = {
            let mut inner = self.core.inner.borrow_mut();
            let detached = inner
                .queues
                .get_mut(&task.key)
                .and_then(|queue| queue.remove(task.order));
            inner.prune_if_empty(&task.key);
            match detached {
                Some(found) => {
                    debug_assert!(
                        found.state == SchedulingState::Scheduled,
                        "run invoked on a task that was never admitted"
                    );
                    let prev = inner.current_context.replace(found.context.clone());
                    (Some(found), prev)
                }
                None => (None, None),
            }
        };
        let Some(mut detached) = detached else {
            debug!(order = task.order, "Scheduler::run: stale task ref, no-op");
            return Ok(());
        };

        // Borrow released: the callback may post, yield, abort, or change
        // priorities on this same scheduler.
        let outcome = match detached.callback.take() {
            None => Ok(Value::Null),
            Some(callback) => callback(&detached.context),
        };

        {
            let mut inner = self.core.inner.borrow_mut();
            inner.current_context = prev_context;
            inner.stats.total_ran += 1;
        }

        match outcome {
            Ok(value) => {
                detached.completion.resolve(value);
                Ok(())
            }
            Err(CallbackError::Caught(reason)) => {
                detached.completion.reject(ScheduleError::CallbackFailed { reason });
                Ok(())
            }
            Err(CallbackError::Uncatchable(reason)) => {
                warn!(%reason, "Scheduler::run: uncatchable callback failure, propagating");
                Err(FatalError { reason })
            }
        }
    }

    /// Tear the scheduler down, discarding all queues
    ///
    /// Pending completions are deliberately left unsettled; this is not a
    /// cancellation path. Submissions after disconnect reject with
    /// [`ScheduleError::HostUnavailable`].
    pub fn disconnect(&self) {
        debug!("Scheduler::disconnect: called");
        let mut inner = self.core.inner.borrow_mut();
        inner.disconnected = true;
        inner.queues.clear();
        inner.delayed.clear();
    }

    /// Whether [`disconnect`](Self::disconnect) has been called
    pub fn is_disconnected(&self) -> bool {
        self.core.inner.borrow().disconnected
    }

    /// Priority context of the task currently running on this scheduler
    pub fn current_context(&self) -> Option<TaskContext> {
        self.core.inner.borrow().current_context.clone()
    }

    /// Number of live (non-empty) task queues
    pub fn queue_count(&self) -> usize {
        self.core.inner.borrow().queues.len()
    }

    /// Total tasks currently owned by this scheduler, queued or awaiting
    /// delayed admission
    pub fn task_count(&self) -> usize {
        let inner = self.core.inner.borrow();
        inner.queues.values().map(TaskQueue::len).sum::<usize>() + inner.delayed.len()
    }

    /// Number of queues at or above the configured urgent threshold that
    /// hold scheduled work
    ///
    /// Hosts poll this to decide whether they must keep servicing the
    /// scheduler; it is per-instance state, never shared across schedulers.
    pub fn urgent_scheduled_queue_count(&self) -> usize {
        let threshold = effective_priority(self.core.config.urgent_threshold, false);
        self.core
            .inner
            .borrow()
            .queues
            .values()
            .filter(|queue| {
                queue.effective_priority() >= threshold && queue.earliest_scheduled_order().is_some()
            })
            .count()
    }

    /// Snapshot of the scheduler's statistics
    pub fn stats(&self) -> SchedulerStats {
        self.core.inner.borrow().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    /// Host loop mock: records admission requests, accepts or refuses on demand
    struct TestHost {
        accept: Cell<bool>,
        requests: RefCell<Vec<u8>>,
    }

    impl TestHost {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                accept: Cell::new(true),
                requests: RefCell::new(Vec::new()),
            })
        }
    }

    impl HostLoop for TestHost {
        fn request_admission(&self, effective_priority: u8) -> bool {
            self.requests.borrow_mut().push(effective_priority);
            self.accept.get()
        }
    }

    /// Timer mock: holds armed deadlines until the test fires them
    #[derive(Default)]
    struct ManualTimer {
        armed: RefCell<Vec<(Duration, Box<dyn FnOnce()>)>>,
    }

    impl ManualTimer {
        fn new() -> Rc<Self> {
            Rc::new(Self::default())
        }

        fn fire_all(&self) {
            let armed = std::mem::take(&mut *self.armed.borrow_mut());
            for (_, on_fire) in armed {
                on_fire();
            }
        }
    }

    impl TimerService for ManualTimer {
        fn schedule_once(&self, delay: Duration, on_fire: Box<dyn FnOnce()>) {
            self.armed.borrow_mut().push((delay, on_fire));
        }
    }

    fn test_scheduler() -> (Scheduler, Rc<TestHost>, Rc<ManualTimer>) {
        let host = TestHost::new();
        let timer = ManualTimer::new();
        let scheduler = Scheduler::new(host.clone(), timer.clone(), SchedulerConfig::default());
        (scheduler, host, timer)
    }

    fn noop() -> TaskCallback {
        Box::new(|_| Ok(Value::Null))
    }

    fn static_post(priority: Priority) -> PostOptions {
        PostOptions {
            priority: Some(priority),
            ..Default::default()
        }
    }

    /// Run every schedulable task, returning the enqueue orders in run order
    fn drain(scheduler: &Scheduler) -> Vec<u64> {
        let mut ran = Vec::new();
        while let Some(task) = scheduler.get_next_task() {
            ran.push(task.enqueue_order());
            scheduler.run(task).expect("no fatal failures in drain");
        }
        ran
    }

    #[test]
    fn test_priority_ordering() {
        let (scheduler, _host, _timer) = test_scheduler();
        scheduler.post(noop(), static_post(Priority::Background)); // order 0
        scheduler.post(noop(), static_post(Priority::UserBlocking)); // order 1

        assert_eq!(drain(&scheduler), vec![1, 0]);
    }

    #[test]
    fn test_fifo_within_a_queue() {
        let (scheduler, _host, _timer) = test_scheduler();
        for _ in 0..3 {
            scheduler.post(noop(), static_post(Priority::UserVisible));
        }
        assert_eq!(drain(&scheduler), vec![0, 1, 2]);
    }

    #[test]
    fn test_continuation_preference() {
        let (scheduler, _host, _timer) = test_scheduler();
        // Fresh at UserVisible (order 0), continuation at UserVisible
        // (order 1), fresh at UserBlocking (order 2).
        scheduler.post(noop(), static_post(Priority::UserVisible));
        scheduler.yield_now(YieldOptions::default());
        scheduler.post(noop(), static_post(Priority::UserBlocking));

        // Higher class first, then the continuation, then the fresh task.
        assert_eq!(drain(&scheduler), vec![2, 1, 0]);
    }

    #[test]
    fn test_concrete_scenario_run_order() {
        let (scheduler, _host, _timer) = test_scheduler();
        let f1 = scheduler.post(noop(), static_post(Priority::Background)); // order 0
        let f2 = scheduler.post(noop(), static_post(Priority::UserBlocking)); // order 1
        let yielded = scheduler.yield_now(YieldOptions::default()); // order 2
        let f3 = scheduler.post(noop(), static_post(Priority::UserBlocking)); // order 3

        assert_eq!(drain(&scheduler), vec![1, 3, 2, 0]);
        for handle in [&f1, &f2, &f3, &yielded] {
            assert!(handle.is_settled());
        }
        assert_eq!(yielded.result(), Some(Ok(Value::Null)));
    }

    #[test]
    fn test_equal_tier_races_by_enqueue_order_across_queues() {
        let (scheduler, _host, _timer) = test_scheduler();
        // Two distinct dynamic signals, both at UserVisible: same tier,
        // different queues.
        let a = PrioritySignal::new(Priority::UserVisible);
        let b = PrioritySignal::new(Priority::UserVisible);
        scheduler.post(noop(), PostOptions { signal: Some(b.clone()), ..Default::default() }); // 0
        scheduler.post(noop(), PostOptions { signal: Some(a.clone()), ..Default::default() }); // 1
        scheduler.post(noop(), PostOptions { signal: Some(b), ..Default::default() }); // 2

        // Global FIFO within the tier despite the queue partition.
        assert_eq!(drain(&scheduler), vec![0, 1, 2]);
    }

    #[test]
    fn test_already_aborted_submission_rejects_without_queueing() {
        let (scheduler, host, _timer) = test_scheduler();
        let abort = AbortSignal::new();
        abort.abort(json!("too late"));

        let handle = scheduler.post(
            noop(),
            PostOptions {
                abort: Some(abort),
                ..Default::default()
            },
        );

        assert_eq!(
            handle.result(),
            Some(Err(ScheduleError::Aborted { reason: json!("too late") }))
        );
        assert_eq!(scheduler.queue_count(), 0, "no observable queue mutation");
        assert!(host.requests.borrow().is_empty(), "no admission requested");
    }

    #[test]
    fn test_admission_refused_rejects_and_prunes() {
        let (scheduler, host, _timer) = test_scheduler();
        host.accept.set(false);

        let handle = scheduler.post(noop(), static_post(Priority::UserBlocking));

        assert_eq!(handle.result(), Some(Err(ScheduleError::AdmissionRefused)));
        assert_eq!(scheduler.queue_count(), 0);
        assert_eq!(scheduler.stats().total_admission_refused, 1);
    }

    #[test]
    fn test_admission_request_carries_effective_priority() {
        let (scheduler, host, _timer) = test_scheduler();
        scheduler.post(noop(), static_post(Priority::Background));
        scheduler.post(noop(), static_post(Priority::UserBlocking));
        scheduler.yield_now(YieldOptions::default());

        assert_eq!(*host.requests.borrow(), vec![0, 4, 3]);
    }

    #[test]
    fn test_abort_removes_queued_task() {
        let (scheduler, _host, _timer) = test_scheduler();
        let abort = AbortSignal::new();
        let handle = scheduler.post(
            noop(),
            PostOptions {
                priority: Some(Priority::UserVisible),
                abort: Some(abort.clone()),
                ..Default::default()
            },
        );

        abort.abort(json!("user navigated away"));

        assert_eq!(
            handle.result(),
            Some(Err(ScheduleError::Aborted { reason: json!("user navigated away") }))
        );
        assert_eq!(scheduler.queue_count(), 0);
        assert!(scheduler.get_next_task().is_none());
        assert_eq!(scheduler.stats().total_aborted, 1);
    }

    #[test]
    fn test_abort_after_run_is_noop() {
        let (scheduler, _host, _timer) = test_scheduler();
        let abort = AbortSignal::new();
        let handle = scheduler.post(
            Box::new(|_| Ok(json!("done"))),
            PostOptions {
                abort: Some(abort.clone()),
                ..Default::default()
            },
        );

        let task = scheduler.get_next_task().expect("task scheduled");
        scheduler.run(task).unwrap();
        assert_eq!(handle.result(), Some(Ok(json!("done"))));

        // Firing after the run must not re-settle or panic.
        abort.abort(json!("ignored"));
        assert_eq!(handle.result(), Some(Ok(json!("done"))));
    }

    #[test]
    fn test_run_on_stale_ref_is_noop() {
        let (scheduler, _host, _timer) = test_scheduler();
        let abort = AbortSignal::new();
        let handle = scheduler.post(
            noop(),
            PostOptions {
                abort: Some(abort.clone()),
                ..Default::default()
            },
        );

        let task = scheduler.get_next_task().expect("task scheduled");
        abort.abort(json!("raced"));

        // Abort won the race; run is a quiet no-op.
        assert!(scheduler.run(task).is_ok());
        assert_eq!(
            handle.result(),
            Some(Err(ScheduleError::Aborted { reason: json!("raced") }))
        );
        assert_eq!(scheduler.stats().total_ran, 0);
    }

    #[test]
    fn test_dynamic_priority_propagation() {
        let (scheduler, _host, _timer) = test_scheduler();
        let signal = PrioritySignal::new(Priority::Background);
        scheduler.post(noop(), PostOptions { signal: Some(signal.clone()), ..Default::default() }); // 0
        scheduler.post(noop(), static_post(Priority::UserVisible)); // 1

        // Background (tier 0) loses to UserVisible (tier 2)...
        let first = scheduler.get_next_task().unwrap();
        assert_eq!(first.enqueue_order(), 1);

        // ...until the signal is raised; no task moves, the very next
        // selection reflects the change.
        signal.set_priority(Priority::UserBlocking);
        let next = scheduler.get_next_task().unwrap();
        assert_eq!(next.enqueue_order(), 0);
    }

    #[test]
    fn test_priority_change_updates_continuation_queue_too() {
        let (scheduler, _host, _timer) = test_scheduler();
        let signal = PrioritySignal::new(Priority::Background);
        scheduler.yield_now(YieldOptions { signal: Some(signal.clone()), ..Default::default() }); // 0, tier 1
        scheduler.post(noop(), static_post(Priority::UserVisible)); // 1, tier 2

        assert_eq!(scheduler.get_next_task().unwrap().enqueue_order(), 1);

        signal.set_priority(Priority::UserBlocking); // continuation now tier 5
        assert_eq!(scheduler.get_next_task().unwrap().enqueue_order(), 0);
    }

    #[test]
    fn test_explicit_priority_overrides_signal() {
        let (scheduler, _host, _timer) = test_scheduler();
        let signal = PrioritySignal::new(Priority::UserBlocking);
        scheduler.post(
            noop(),
            PostOptions {
                priority: Some(Priority::Background),
                signal: Some(signal.clone()),
                ..Default::default()
            },
        ); // 0: static Background despite the signal
        scheduler.post(noop(), static_post(Priority::UserVisible)); // 1

        assert_eq!(drain(&scheduler), vec![1, 0]);
        assert_eq!(signal.dependent_count(), 0, "overridden signal is not registered");
    }

    #[test]
    fn test_queue_pruning_invariant() {
        let (scheduler, host, _timer) = test_scheduler();
        let abort = AbortSignal::new();
        scheduler.post(noop(), static_post(Priority::Background));
        scheduler.post(
            noop(),
            PostOptions {
                priority: Some(Priority::UserBlocking),
                abort: Some(abort.clone()),
                ..Default::default()
            },
        );
        host.accept.set(false);
        scheduler.post(noop(), static_post(Priority::UserVisible)); // refused
        host.accept.set(true);

        abort.abort(json!(null));
        drain(&scheduler);

        assert_eq!(scheduler.queue_count(), 0);
    }

    #[test]
    fn test_callback_failure_rejects_completion() {
        let (scheduler, _host, _timer) = test_scheduler();
        let handle = scheduler.post(
            Box::new(|_| Err(CallbackError::Caught(json!("script error")))),
            PostOptions::default(),
        );

        let task = scheduler.get_next_task().unwrap();
        assert!(scheduler.run(task).is_ok(), "caught failures are recoverable");
        assert_eq!(
            handle.result(),
            Some(Err(ScheduleError::CallbackFailed { reason: json!("script error") }))
        );
    }

    #[test]
    fn test_uncatchable_failure_propagates_without_settling() {
        let (scheduler, _host, _timer) = test_scheduler();
        let handle = scheduler.post(
            Box::new(|_| Err(CallbackError::Uncatchable(json!("context destroyed")))),
            PostOptions::default(),
        );

        let task = scheduler.get_next_task().unwrap();
        let fatal = scheduler.run(task).expect_err("must reach the fatal path");
        assert_eq!(fatal.reason, json!("context destroyed"));

        // Completion deliberately unsettled; queue already pruned.
        assert!(!handle.is_settled());
        assert_eq!(scheduler.queue_count(), 0);
    }

    #[test]
    fn test_callback_sees_its_priority_context() {
        let (scheduler, _host, _timer) = test_scheduler();
        let seen = Rc::new(Cell::new(None));
        let seen_in_cb = seen.clone();
        scheduler.post(
            Box::new(move |context| {
                seen_in_cb.set(Some(context.priority()));
                Ok(Value::Null)
            }),
            static_post(Priority::UserBlocking),
        );

        drain(&scheduler);
        assert_eq!(seen.get(), Some(Priority::UserBlocking));
    }

    #[test]
    fn test_current_context_cleared_after_run() {
        let (scheduler, _host, _timer) = test_scheduler();
        let observed = Rc::new(Cell::new(false));
        let observed_in_cb = observed.clone();
        let reentrant = scheduler.clone();
        scheduler.post(
            Box::new(move |_| {
                observed_in_cb.set(reentrant.current_context().is_some());
                Ok(Value::Null)
            }),
            PostOptions::default(),
        );

        assert!(scheduler.current_context().is_none());
        drain(&scheduler);
        assert!(observed.get(), "context installed while the callback runs");
        assert!(scheduler.current_context().is_none());
    }

    #[test]
    fn test_reentrant_post_from_callback() {
        let (scheduler, _host, _timer) = test_scheduler();
        let reentrant = scheduler.clone();
        scheduler.post(
            Box::new(move |_| {
                reentrant.post(noop(), static_post(Priority::UserBlocking)); // order 1
                Ok(Value::Null)
            }),
            static_post(Priority::Background),
        ); // order 0

        assert_eq!(drain(&scheduler), vec![0, 1]);
        assert_eq!(scheduler.queue_count(), 0);
    }

    #[test]
    fn test_yield_inherits_running_task_signal() {
        let (scheduler, _host, _timer) = test_scheduler();
        let signal = PrioritySignal::new(Priority::UserBlocking);
        let reentrant = scheduler.clone();
        scheduler.post(
            Box::new(move |_| {
                // Continuation inherits the dynamic source: tier 5.
                reentrant.yield_now(YieldOptions::default());
                Ok(Value::Null)
            }),
            PostOptions {
                signal: Some(signal),
                ..Default::default()
            },
        ); // order 0
        scheduler.post(noop(), static_post(Priority::UserBlocking)); // order 1, tier 4

        // The inherited continuation (order 2, tier 5) beats the fresh
        // UserBlocking task posted earlier.
        assert_eq!(drain(&scheduler), vec![0, 2, 1]);
    }

    #[test]
    fn test_disconnect_discards_queues_without_settling() {
        let (scheduler, _host, _timer) = test_scheduler();
        let handle = scheduler.post(noop(), PostOptions::default());

        scheduler.disconnect();

        assert!(scheduler.is_disconnected());
        assert!(!handle.is_settled(), "teardown is not a cancellation path");
        assert_eq!(scheduler.queue_count(), 0);
        assert!(scheduler.get_next_task().is_none());

        let late = scheduler.post(noop(), PostOptions::default());
        assert_eq!(late.result(), Some(Err(ScheduleError::HostUnavailable)));
    }

    #[test]
    fn test_delayed_task_waits_for_timer() {
        let (scheduler, _host, timer) = test_scheduler();
        let delayed = scheduler.post(
            noop(),
            PostOptions {
                priority: Some(Priority::UserBlocking),
                delay: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        ); // order 0
        scheduler.post(noop(), static_post(Priority::Background)); // order 1

        // Only the undelayed Background task is runnable now; the delayed
        // task is owned by the scheduler but invisible to selection.
        assert_eq!(scheduler.task_count(), 2);
        assert_eq!(drain(&scheduler), vec![1]);
        assert!(!delayed.is_settled());
        assert_eq!(scheduler.task_count(), 1);
        assert_eq!(scheduler.queue_count(), 0);

        timer.fire_all();
        scheduler.post(noop(), static_post(Priority::Background)); // order 2
        assert_eq!(drain(&scheduler), vec![0, 2]);
        assert!(delayed.is_settled());
    }

    #[test]
    fn test_delayed_task_abort_before_fire() {
        let (scheduler, _host, timer) = test_scheduler();
        let abort = AbortSignal::new();
        let handle = scheduler.post(
            noop(),
            PostOptions {
                delay: Some(Duration::from_millis(10)),
                abort: Some(abort.clone()),
                ..Default::default()
            },
        );

        abort.abort(json!("cancelled while pending"));
        assert_eq!(
            handle.result(),
            Some(Err(ScheduleError::Aborted { reason: json!("cancelled while pending") }))
        );

        // A later fire finds nothing to admit.
        timer.fire_all();
        assert_eq!(scheduler.queue_count(), 0);
        assert!(scheduler.get_next_task().is_none());
    }

    #[test]
    fn test_delayed_admission_failure_rejects() {
        let (scheduler, host, timer) = test_scheduler();
        let handle = scheduler.post(
            noop(),
            PostOptions {
                delay: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );

        host.accept.set(false);
        timer.fire_all();

        assert_eq!(handle.result(), Some(Err(ScheduleError::AdmissionRefused)));
        assert_eq!(scheduler.queue_count(), 0);
    }

    #[test]
    fn test_delayed_fire_after_disconnect_is_noop() {
        let (scheduler, _host, timer) = test_scheduler();
        let handle = scheduler.post(
            noop(),
            PostOptions {
                delay: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );

        scheduler.disconnect();
        timer.fire_all();

        assert!(!handle.is_settled());
        assert_eq!(scheduler.queue_count(), 0);
    }

    #[test]
    fn test_delayed_fire_after_scheduler_drop_is_noop() {
        let host = TestHost::new();
        let timer = ManualTimer::new();
        let scheduler = Scheduler::new(host, timer.clone(), SchedulerConfig::default());
        scheduler.post(
            noop(),
            PostOptions {
                delay: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );

        drop(scheduler);
        // The timer holds only a weak scheduler reference.
        timer.fire_all();
    }

    #[test]
    fn test_urgent_scheduled_queue_count() {
        let (scheduler, _host, _timer) = test_scheduler();
        assert_eq!(scheduler.urgent_scheduled_queue_count(), 0);

        scheduler.post(noop(), static_post(Priority::Background));
        assert_eq!(scheduler.urgent_scheduled_queue_count(), 0);

        let signal = PrioritySignal::new(Priority::UserBlocking);
        scheduler.post(noop(), PostOptions { signal: Some(signal.clone()), ..Default::default() });
        scheduler.post(noop(), static_post(Priority::UserBlocking));
        assert_eq!(scheduler.urgent_scheduled_queue_count(), 2);

        signal.set_priority(Priority::Background);
        assert_eq!(scheduler.urgent_scheduled_queue_count(), 1);

        drain(&scheduler);
        assert_eq!(scheduler.urgent_scheduled_queue_count(), 0);
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let (scheduler, host, _timer) = test_scheduler();
        let abort = AbortSignal::new();
        scheduler.post(noop(), PostOptions::default());
        scheduler.post(
            noop(),
            PostOptions {
                abort: Some(abort.clone()),
                ..Default::default()
            },
        );
        scheduler.yield_now(YieldOptions::default());
        host.accept.set(false);
        scheduler.post(noop(), static_post(Priority::Background));
        host.accept.set(true);

        abort.abort(json!(null));
        drain(&scheduler);

        let stats = scheduler.stats();
        assert_eq!(stats.total_posted, 3);
        assert_eq!(stats.total_yielded, 1);
        assert_eq!(stats.total_ran, 2);
        assert_eq!(stats.total_aborted, 1);
        assert_eq!(stats.total_admission_refused, 1);
        assert!(stats.peak_queue_count >= 2);
    }
}
