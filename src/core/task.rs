//! Task state machine: one schedulable, retryable unit of user work.
//!
//! A task moves `New -> Queued -> Pending -> Done` in the happy path.
//! Failures settle it into `Retry` (eligible for re-queueing) or `Rejected`
//! (terminal). Startup and execution timeouts are driven by internal timer
//! tasks holding a weak back-reference, so a dropped task never keeps a
//! timer alive.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::TaskOptions;
use crate::core::error::TaskError;
use crate::pool::RentalDetails;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TaskState {
    /// Created, not yet accepted by the scheduler loop.
    New,
    /// Initialized and waiting for a rental.
    Queued,
    /// Running against a leased rental.
    Pending,
    /// Finished successfully; result stored.
    Done,
    /// Failed retryably; eligible for head re-queueing.
    Retry,
    /// Failed terminally; error stored.
    Rejected,
}

/// Outcome of one execution attempt.
pub type WorkResult<R> = Result<R, TaskError>;

/// Boxed future produced by a work function.
pub type BoxWorkFuture<R> = Pin<Box<dyn Future<Output = WorkResult<R>> + Send>>;

/// The caller's unit of work, invoked with the leased execution unit.
pub type WorkFn<R, U> = Arc<dyn Fn(Arc<U>) -> BoxWorkFuture<R> + Send + Sync>;

/// One observed state change.
#[derive(Debug, Clone, Copy)]
pub struct TaskTransition {
    /// State before the transition.
    pub from: TaskState,
    /// State after the transition.
    pub to: TaskState,
}

/// Detachable handle for a registered transition listener.
#[derive(Debug)]
pub struct Subscription(u64);

type Listener = Arc<dyn Fn(&TaskTransition) + Send + Sync>;

/// Pure snapshot of a task for telemetry, valid at any lifecycle point.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskDetails {
    /// Task identifier.
    pub id: String,
    /// Current state.
    pub state: TaskState,
    /// Retry transitions taken so far.
    pub retries: u32,
    /// Agreement backing the current/last rental, when one was leased.
    pub agreement_id: Option<String>,
    /// Provider of the current/last rental, when one was leased.
    pub provider_name: Option<String>,
    /// Last stored error, rendered.
    pub error: Option<String>,
}

struct Inner<R> {
    state: TaskState,
    retries: u32,
    result: Option<R>,
    error: Option<TaskError>,
    rental: Option<RentalDetails>,
}

#[derive(Default)]
struct Timers {
    startup: Option<JoinHandle<()>>,
    execution: Option<JoinHandle<()>>,
}

/// A schedulable unit of work with retry/timeout policy and outcome.
pub struct Task<R, U> {
    id: String,
    options: TaskOptions,
    work: WorkFn<R, U>,
    inner: Mutex<Inner<R>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    settled: Notify,
    timers: Mutex<Timers>,
}

impl<R, U> Task<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    /// Create a task in the `New` state.
    ///
    /// Options are validated at the configuration boundary; the typed
    /// [`TaskOptions`] cannot express an invalid policy.
    pub fn new(id: impl Into<String>, work: WorkFn<R, U>, options: TaskOptions) -> Self {
        Self {
            id: id.into(),
            options,
            work,
            inner: Mutex::new(Inner {
                state: TaskState::New,
                retries: 0,
                result: None,
                error: None,
                rental: None,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            settled: Notify::new(),
            timers: Mutex::new(Timers::default()),
        }
    }

    /// Task identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The task's retry/timeout policy.
    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Retry transitions taken so far.
    pub fn retries(&self) -> u32 {
        self.inner.lock().retries
    }

    /// Whether the task may be inserted into the queue.
    pub fn is_queueable(&self) -> bool {
        matches!(self.state(), TaskState::New | TaskState::Retry)
    }

    /// Whether the task reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TaskState::Done | TaskState::Rejected)
    }

    /// Last stored error, if any.
    pub fn error(&self) -> Option<TaskError> {
        self.inner.lock().error.clone()
    }

    /// Move the stored result out of the task, once.
    pub fn take_result(&self) -> Option<R> {
        self.inner.lock().result.take()
    }

    pub(crate) fn work(&self) -> WorkFn<R, U> {
        Arc::clone(&self.work)
    }

    /// Pure snapshot for telemetry.
    pub fn details(&self) -> TaskDetails {
        let inner = self.inner.lock();
        TaskDetails {
            id: self.id.clone(),
            state: inner.state,
            retries: inner.retries,
            agreement_id: inner.rental.as_ref().map(|r| r.agreement_id.clone()),
            provider_name: inner.rental.as_ref().map(|r| r.provider_name.clone()),
            error: inner.error.as_ref().map(ToString::to_string),
        }
    }

    /// Register a transition listener, invoked synchronously in registration
    /// order on every state change.
    pub fn subscribe(&self, listener: impl Fn(&TaskTransition) + Send + Sync + 'static) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Detach a previously registered listener.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.listeners.lock().retain(|(id, _)| *id != subscription.0);
    }

    /// Accept the task into the scheduled lifecycle: `New`/`Retry` -> `Queued`.
    ///
    /// Arms the startup timer when one is configured. Calling from any other
    /// state is an internal error.
    pub fn init(self: &Arc<Self>) -> Result<(), TaskError> {
        let from = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, TaskState::New | TaskState::Retry) {
                return Err(TaskError::Internal(format!(
                    "task {} cannot be queued from state {:?}",
                    self.id, inner.state
                )));
            }
            let from = inner.state;
            inner.state = TaskState::Queued;
            from
        };
        self.arm_startup_timer();
        self.notify_transition(from, TaskState::Queued);
        Ok(())
    }

    /// Begin executing against a leased rental: `Queued` -> `Pending`.
    ///
    /// Cancels the startup timer, arms the execution timer, and records the
    /// rental identity for telemetry. Calling from any state other than
    /// `Queued` is an internal error, which prevents double-starting.
    pub fn start(self: &Arc<Self>, rental: RentalDetails) -> Result<(), TaskError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != TaskState::Queued {
                return Err(TaskError::Internal(format!(
                    "task {} cannot start from state {:?}",
                    self.id, inner.state
                )));
            }
            inner.state = TaskState::Pending;
            inner.rental = Some(rental);
        }
        self.abort_startup_timer();
        self.arm_execution_timer();
        self.notify_transition(TaskState::Queued, TaskState::Pending);
        Ok(())
    }

    /// Settle one execution attempt.
    ///
    /// `Ok` stores the result and moves to `Done`. `Err` moves to `Retry`
    /// when `retryable` and retries remain, `Rejected` otherwise. Idempotent:
    /// once the task left `Queued`/`Pending` further calls are silent no-ops,
    /// which guards against a timer racing an explicit completion.
    pub fn stop(&self, outcome: WorkResult<R>, retryable: bool) {
        self.settle(None, outcome, retryable);
    }

    fn settle(&self, only_from: Option<TaskState>, outcome: WorkResult<R>, retryable: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, TaskState::Queued | TaskState::Pending) {
                return;
            }
            if let Some(expected) = only_from {
                if inner.state != expected {
                    return;
                }
            }
            let from = inner.state;
            let to = match outcome {
                Ok(result) => {
                    inner.result = Some(result);
                    TaskState::Done
                }
                Err(error) => {
                    inner.error = Some(error);
                    if retryable && inner.retries < self.options.max_retries {
                        inner.retries += 1;
                        TaskState::Retry
                    } else {
                        TaskState::Rejected
                    }
                }
            };
            inner.state = to;
            TaskTransition { from, to }
        };
        self.abort_timers();
        self.notify_transition(transition.from, transition.to);
    }

    /// Resolves once the task reaches `Done` or `Rejected`.
    pub async fn wait_finished(&self) {
        loop {
            let notified = self.settled.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once the task is no longer in `state`.
    pub(crate) async fn wait_while(&self, state: TaskState) {
        loop {
            let notified = self.settled.notified();
            if self.state() != state {
                return;
            }
            notified.await;
        }
    }

    fn notify_transition(&self, from: TaskState, to: TaskState) {
        tracing::debug!(task = %self.id, ?from, ?to, "task transition");
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        let transition = TaskTransition { from, to };
        for listener in listeners {
            listener(&transition);
        }
        self.settled.notify_waiters();
    }

    fn arm_startup_timer(self: &Arc<Self>) {
        let Some(timeout) = self.options.startup_timeout else {
            return;
        };
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(task) = weak.upgrade() {
                let retryable = task.options.retry_on_timeout;
                task.settle(
                    Some(TaskState::Queued),
                    Err(TaskError::StartupTimeout(timeout)),
                    retryable,
                );
            }
        });
        if let Some(old) = self.timers.lock().startup.replace(handle) {
            old.abort();
        }
    }

    fn arm_execution_timer(self: &Arc<Self>) {
        let Some(timeout) = self.options.timeout else {
            return;
        };
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(task) = weak.upgrade() {
                let retryable = task.options.retry_on_timeout;
                task.settle(
                    Some(TaskState::Pending),
                    Err(TaskError::ExecutionTimeout(timeout)),
                    retryable,
                );
            }
        });
        if let Some(old) = self.timers.lock().execution.replace(handle) {
            old.abort();
        }
    }

    fn abort_startup_timer(&self) {
        if let Some(handle) = self.timers.lock().startup.take() {
            handle.abort();
        }
    }

    fn abort_timers(&self) {
        let mut timers = self.timers.lock();
        if let Some(handle) = timers.startup.take() {
            handle.abort();
        }
        if let Some(handle) = timers.execution.take() {
            handle.abort();
        }
    }
}

impl<R, U> std::fmt::Debug for Task<R, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn noop_work() -> WorkFn<u32, ()> {
        Arc::new(|_unit| Box::pin(async { Ok(0) }))
    }

    fn make_task(options: TaskOptions) -> Arc<Task<u32, ()>> {
        Arc::new(Task::new("t-1", noop_work(), options))
    }

    fn rental_details() -> RentalDetails {
        RentalDetails {
            agreement_id: "agreement-1".into(),
            provider_name: "provider-1".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_done() {
        let task = make_task(TaskOptions::default());
        assert_eq!(task.state(), TaskState::New);
        assert!(task.is_queueable());

        task.init().unwrap();
        assert_eq!(task.state(), TaskState::Queued);

        task.start(rental_details()).unwrap();
        assert_eq!(task.state(), TaskState::Pending);

        task.stop(Ok(42), false);
        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(task.take_result(), Some(42));

        let details = task.details();
        assert_eq!(details.agreement_id.as_deref(), Some("agreement-1"));
        assert_eq!(details.provider_name.as_deref(), Some("provider-1"));
    }

    #[tokio::test]
    async fn start_outside_queued_is_an_internal_error() {
        let task = make_task(TaskOptions::default());
        assert!(matches!(
            task.start(rental_details()),
            Err(TaskError::Internal(_))
        ));

        task.init().unwrap();
        task.start(rental_details()).unwrap();
        // Double start.
        assert!(matches!(
            task.start(rental_details()),
            Err(TaskError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent_after_settling() {
        let task = make_task(TaskOptions::default());
        task.init().unwrap();
        task.start(rental_details()).unwrap();

        task.stop(Ok(1), false);
        assert_eq!(task.state(), TaskState::Done);

        // Differing arguments must not change the settled state.
        task.stop(Err(TaskError::Execution("late".into())), true);
        assert_eq!(task.state(), TaskState::Done);
        assert!(task.error().is_none());
        assert_eq!(task.take_result(), Some(1));
    }

    #[tokio::test]
    async fn retries_are_counted_and_exhausted() {
        let task = make_task(TaskOptions {
            max_retries: 2,
            ..TaskOptions::default()
        });

        for expected_retries in 1..=2 {
            task.init().unwrap();
            task.start(rental_details()).unwrap();
            task.stop(Err(TaskError::Execution("boom".into())), true);
            assert_eq!(task.state(), TaskState::Retry);
            assert_eq!(task.retries(), expected_retries);
            assert!(task.is_queueable());
        }

        // Third failure: retries exhausted, no further increment.
        task.init().unwrap();
        task.start(rental_details()).unwrap();
        task.stop(Err(TaskError::Execution("boom".into())), true);
        assert_eq!(task.state(), TaskState::Rejected);
        assert_eq!(task.retries(), 2);
        assert!(task.error().is_some());
    }

    #[tokio::test]
    async fn non_retryable_error_rejects_immediately() {
        let task = make_task(TaskOptions {
            max_retries: 5,
            ..TaskOptions::default()
        });
        task.init().unwrap();
        task.start(rental_details()).unwrap();
        task.stop(Err(TaskError::Internal("bug".into())), false);
        assert_eq!(task.state(), TaskState::Rejected);
        assert_eq!(task.retries(), 0);
    }

    #[tokio::test]
    async fn listeners_fire_in_registration_order_and_detach() {
        let task = make_task(TaskOptions::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = Arc::clone(&order);
            task.subscribe(move |t| order.lock().push(("first", t.to)))
        };
        let _second = {
            let order = Arc::clone(&order);
            task.subscribe(move |t| order.lock().push(("second", t.to)))
        };

        task.init().unwrap();
        {
            let seen = order.lock();
            assert_eq!(
                *seen,
                vec![("first", TaskState::Queued), ("second", TaskState::Queued)]
            );
        }

        task.unsubscribe(first);
        task.start(rental_details()).unwrap();
        let seen = order.lock();
        assert_eq!(seen.last(), Some(&("second", TaskState::Pending)));
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn startup_timer_rejects_a_stuck_queued_task() {
        let task = make_task(TaskOptions {
            startup_timeout: Some(Duration::from_millis(20)),
            ..TaskOptions::default()
        });
        task.init().unwrap();
        task.wait_finished().await;
        assert_eq!(task.state(), TaskState::Rejected);
        assert!(matches!(task.error(), Some(TaskError::StartupTimeout(_))));
    }

    #[tokio::test]
    async fn startup_timer_retries_when_opted_in() {
        let task = make_task(TaskOptions {
            max_retries: 1,
            startup_timeout: Some(Duration::from_millis(20)),
            retry_on_timeout: true,
            ..TaskOptions::default()
        });
        task.init().unwrap();
        task.wait_while(TaskState::Queued).await;
        assert_eq!(task.state(), TaskState::Retry);
        assert_eq!(task.retries(), 1);
    }

    #[tokio::test]
    async fn execution_timer_fires_only_while_pending() {
        let task = make_task(TaskOptions {
            timeout: Some(Duration::from_millis(20)),
            ..TaskOptions::default()
        });
        task.init().unwrap();
        task.start(rental_details()).unwrap();
        task.wait_finished().await;
        assert_eq!(task.state(), TaskState::Rejected);
        assert!(matches!(task.error(), Some(TaskError::ExecutionTimeout(_))));
    }

    #[tokio::test]
    async fn completing_before_the_execution_timer_wins() {
        let task = make_task(TaskOptions {
            timeout: Some(Duration::from_millis(200)),
            ..TaskOptions::default()
        });
        task.init().unwrap();
        task.start(rental_details()).unwrap();
        task.stop(Ok(7), false);
        assert_eq!(task.state(), TaskState::Done);

        // Let the timer window elapse; the settled state must hold.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(task.state(), TaskState::Done);
    }

    #[tokio::test]
    async fn wait_finished_wakes_on_terminal_transition() {
        let task = make_task(TaskOptions::default());
        task.init().unwrap();
        task.start(rental_details()).unwrap();

        let waiter = {
            let task = Arc::clone(&task);
            tokio::spawn(async move {
                task.wait_finished().await;
                task.state()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.stop(Ok(9), false);
        assert_eq!(waiter.await.unwrap(), TaskState::Done);
    }

    #[tokio::test]
    async fn listener_count_is_independent_per_task() {
        let task = make_task(TaskOptions::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in = Arc::clone(&hits);
        let sub = task.subscribe(move |_| {
            hits_in.fetch_add(1, Ordering::Relaxed);
        });
        task.init().unwrap();
        task.unsubscribe(sub);
        task.start(rental_details()).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
