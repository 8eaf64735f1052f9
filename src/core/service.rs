//! Scheduler loop: drives tasks from `Queued` through completion while never
//! exceeding the parallelism ceiling, and guarantees every acquired rental is
//! released or destroyed exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ExecutorConfig;
use crate::core::error::TaskError;
use crate::core::events::{EventBus, ExecutorEvent};
use crate::core::queue::TaskQueue;
use crate::core::stats::StatsService;
use crate::core::task::{Subscription, Task, TaskState};
use crate::pool::{Rental, RentalPool};

/// Increments the active-task counter on creation and decrements it on drop,
/// so the count survives every exit path of a spawned execution.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self { active }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The scheduler service.
///
/// A single cooperative dequeue loop launches each task's execution
/// concurrently; the loop itself only waits on "active count under ceiling"
/// and "queue non-empty", both polled with a short idle backoff.
pub struct TaskService<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    queue: Arc<TaskQueue<R, U>>,
    pool: Arc<dyn RentalPool<U>>,
    events: EventBus,
    stats: Arc<StatsService>,
    max_parallel: usize,
    poll_interval: Duration,
    running: AtomicBool,
    active: Arc<AtomicUsize>,
    retries_total: AtomicU64,
    acquired_total: AtomicU64,
}

impl<R, U> TaskService<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    /// Create a service over the given queue and pool.
    pub fn new(
        queue: Arc<TaskQueue<R, U>>,
        pool: Arc<dyn RentalPool<U>>,
        events: EventBus,
        stats: Arc<StatsService>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            pool,
            events,
            stats,
            max_parallel: config.max_parallel_tasks,
            poll_interval: config.queue_poll_interval,
            running: AtomicBool::new(true),
            active: Arc::new(AtomicUsize::new(0)),
            retries_total: AtomicU64::new(0),
            acquired_total: AtomicU64::new(0),
        }
    }

    /// Spawn the dequeue loop onto the runtime.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.run().await })
    }

    /// The dequeue loop. Exits when [`TaskService::end`] is called; does not
    /// cancel executions already in flight.
    pub async fn run(self: Arc<Self>) {
        if let Err(error) = self.pool.ready().await {
            tracing::error!(%error, "rental pool failed to become ready");
            return;
        }
        tracing::info!(max_parallel = self.max_parallel, "task service started");
        while self.running.load(Ordering::Acquire) {
            if self.active.load(Ordering::Acquire) >= self.max_parallel {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            let Some(task) = self.queue.get() else {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };
            // Reserve the slot before spawning so the ceiling holds even if
            // the spawned future is slow to be polled.
            let guard = ActiveGuard::new(Arc::clone(&self.active));
            let service = Arc::clone(&self);
            tokio::spawn(async move {
                service.execute_task(task).await;
                drop(guard);
            });
        }
        tracing::info!("task service stopped");
    }

    /// Stop the dequeue loop. In-flight executions run to their natural stop
    /// and their cleanup still fires.
    pub fn end(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Tasks currently holding an execution slot.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Total retry transitions handled by this service.
    pub fn retries_total(&self) -> u64 {
        self.retries_total.load(Ordering::Relaxed)
    }

    /// Total successful rental acquisitions; feeds the startup watchdog.
    pub fn acquired_total(&self) -> u64 {
        self.acquired_total.load(Ordering::Relaxed)
    }

    async fn execute_task(self: &Arc<Self>, task: Arc<Task<R, U>>) {
        let listener = self.register_listener(&task);

        if let Err(error) = task.init() {
            // A single task's bookkeeping failure must not crash the loop.
            tracing::error!(task = %task.id(), %error, "failed to initialize task");
            task.unsubscribe(listener);
            return;
        }

        if let Some(rental) = self.acquire_for(&task).await {
            let ran = match task.start(rental.details()) {
                Ok(()) => {
                    self.run_attempt(&task, &rental).await;
                    true
                }
                Err(error) => {
                    // The task settled (timer fired) between acquisition and
                    // start; the lease still gets disposed below.
                    tracing::debug!(task = %task.id(), %error, "task settled before start");
                    false
                }
            };
            self.dispose(rental, &task, ran).await;
        }

        if task.state() == TaskState::Retry && !self.queue.has(&task) {
            if let Err(error) = self.queue.add_to_begin(Arc::clone(&task)) {
                tracing::error!(task = %task.id(), %error, "failed to re-queue retried task");
            }
        }
        task.unsubscribe(listener);
    }

    fn register_listener(self: &Arc<Self>, task: &Arc<Task<R, U>>) -> Subscription {
        let service = Arc::clone(self);
        let weak = Arc::downgrade(task);
        task.subscribe(move |transition| {
            let Some(task) = weak.upgrade() else {
                return;
            };
            let details = task.details();
            match transition.to {
                TaskState::Pending => {
                    service.stats.record_started(&details.id);
                    service.events.emit(ExecutorEvent::TaskStarted {
                        id: details.id,
                        agreement_id: details.agreement_id,
                        provider_name: details.provider_name,
                    });
                }
                TaskState::Retry => {
                    service.retries_total.fetch_add(1, Ordering::Relaxed);
                    service.stats.record_retry();
                    service.stats.close_attempt(&details.id);
                    service.events.emit(ExecutorEvent::TaskRetried {
                        id: details.id,
                        retries: details.retries,
                    });
                }
                TaskState::Done => {
                    service.stats.record_finished(&details.id, true);
                    service.events.emit(ExecutorEvent::TaskCompleted { id: details.id });
                }
                TaskState::Rejected => {
                    service.stats.record_finished(&details.id, false);
                    service.events.emit(ExecutorEvent::TaskFailed {
                        id: details.id,
                        error: details.error.unwrap_or_default(),
                    });
                }
                TaskState::New | TaskState::Queued => {}
            }
        })
    }

    /// Lease a rental for the task, aborting the acquisition if the task
    /// settles (startup timeout) while still waiting. A lease is never
    /// acquired for a task nobody will run.
    async fn acquire_for(&self, task: &Arc<Task<R, U>>) -> Option<Rental<U>> {
        tokio::select! {
            () = task.wait_while(TaskState::Queued) => {
                tracing::debug!(task = %task.id(), "acquisition aborted, task left the queue state");
                None
            }
            result = self.pool.acquire() => match result {
                Ok(rental) => {
                    self.acquired_total.fetch_add(1, Ordering::Relaxed);
                    Some(rental)
                }
                Err(error) => {
                    tracing::warn!(task = %task.id(), %error, "rental acquisition failed");
                    task.stop(
                        Err(TaskError::Execution(format!(
                            "rental acquisition failed: {error}"
                        ))),
                        true,
                    );
                    None
                }
            },
        }
    }

    /// Run one execution attempt, racing the work against the task settling
    /// (execution timer). The work is not preempted here; it observes
    /// cancellation cooperatively through its execution unit.
    async fn run_attempt(&self, task: &Arc<Task<R, U>>, rental: &Rental<U>) {
        let work = task.work();
        let attempt = (work)(rental.unit());
        tokio::select! {
            outcome = attempt => {
                let retryable = match &outcome {
                    Ok(_) => false,
                    Err(error) => error.retryable(task.options().retry_on_timeout),
                };
                task.stop(outcome, retryable);
            }
            () = task.wait_while(TaskState::Pending) => {}
        }
    }

    /// Single disposition point: every acquired rental passes through here
    /// exactly once. A rental the task ran on when it failed at the execution
    /// layer is presumed compromised and destroyed. A rental the task never
    /// started on is still healthy and returns to the pool, even when the
    /// task itself was rejected while waiting.
    async fn dispose(&self, rental: Rental<U>, task: &Arc<Task<R, U>>, ran: bool) {
        self.stats.record_cost(rental.cost());
        let result = match task.state() {
            TaskState::Done | TaskState::Retry => self.pool.release(rental).await,
            TaskState::Rejected => {
                let compromised = ran
                    && task
                        .error()
                        .is_some_and(|error| error.is_execution_layer());
                if compromised {
                    self.pool.destroy(rental).await
                } else {
                    self.pool.release(rental).await
                }
            }
            state => {
                tracing::warn!(task = %task.id(), ?state, "disposing rental for unsettled task");
                self.pool.release(rental).await
            }
        };
        if let Err(error) = result {
            tracing::error!(task = %task.id(), %error, "failed to dispose rental");
        }
    }
}
