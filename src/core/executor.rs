//! Public facade: turns a caller's work function into a scheduled task and
//! blocks the caller until it settles.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ExecutorConfig, TaskOptions};
use crate::core::error::{ExecutorError, TaskError};
use crate::core::events::{EventBus, ExecutorEvent};
use crate::core::queue::TaskQueue;
use crate::core::service::TaskService;
use crate::core::stats::{StatsService, StatsSnapshot};
use crate::core::task::{Task, TaskState, WorkFn, WorkResult};
use crate::pool::RentalPool;

/// Bounded-concurrency task executor over a rental pool.
///
/// `R` is the work result type, `U` the execution unit the pool leases.
/// Create with [`RentalExecutor::start`] inside a tokio runtime; submit work
/// with [`RentalExecutor::run`]; stop with [`RentalExecutor::shutdown`].
pub struct RentalExecutor<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    config: ExecutorConfig,
    pool: Arc<dyn RentalPool<U>>,
    queue: Arc<TaskQueue<R, U>>,
    service: Arc<TaskService<R, U>>,
    events: EventBus,
    stats: Arc<StatsService>,
    accepting: AtomicBool,
    shutdown_started: AtomicBool,
    shutdown_done: watch::Sender<bool>,
    service_handle: Mutex<Option<JoinHandle<()>>>,
    watchdog_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<R, U> std::fmt::Debug for RentalExecutor<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RentalExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R, U> RentalExecutor<R, U>
where
    R: Send + 'static,
    U: Send + Sync + 'static,
{
    /// Validate the configuration, spawn the scheduler loop and the startup
    /// watchdog, and return the ready executor.
    pub fn start(
        pool: Arc<dyn RentalPool<U>>,
        config: ExecutorConfig,
    ) -> Result<Arc<Self>, ExecutorError> {
        config.validate().map_err(ExecutorError::InvalidConfig)?;

        let events = EventBus::default();
        let stats = Arc::new(StatsService::new());
        let queue = Arc::new(TaskQueue::new());
        let service = Arc::new(TaskService::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            events.clone(),
            Arc::clone(&stats),
            &config,
        ));
        let (shutdown_done, _) = watch::channel(false);

        let executor = Arc::new(Self {
            config,
            pool,
            queue,
            service,
            events,
            stats,
            accepting: AtomicBool::new(true),
            shutdown_started: AtomicBool::new(false),
            shutdown_done,
            service_handle: Mutex::new(None),
            watchdog_handle: Mutex::new(None),
        });

        *executor.service_handle.lock() = Some(executor.service.spawn());
        executor.spawn_watchdog();
        executor.events.emit(ExecutorEvent::Ready);
        tracing::info!("executor ready");
        Ok(executor)
    }

    /// Submit work under the configured default task options and await its
    /// terminal state.
    pub async fn run<F, Fut>(&self, work: F) -> Result<R, ExecutorError>
    where
        F: Fn(Arc<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        self.run_with_options(work, self.config.task_defaults.clone())
            .await
    }

    /// Submit work with per-task option overrides and await its terminal
    /// state. Returns the stored result on `Done`, the stored error wrapped
    /// with provider/agreement context on `Rejected`, or
    /// [`ExecutorError::Stopped`] if the executor shut down mid-wait.
    pub async fn run_with_options<F, Fut>(
        &self,
        work: F,
        options: TaskOptions,
    ) -> Result<R, ExecutorError>
    where
        F: Fn(Arc<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult<R>> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ExecutorError::Stopped);
        }

        let work: WorkFn<R, U> = Arc::new(move |unit| Box::pin(work(unit)));
        let task = Arc::new(Task::new(Uuid::new_v4().to_string(), work, options));
        self.queue.add_to_end(Arc::clone(&task))?;
        self.events.emit(ExecutorEvent::TaskQueued {
            id: task.id().to_string(),
        });

        let mut done_rx = self.shutdown_done.subscribe();
        tokio::select! {
            biased;
            () = task.wait_finished() => {}
            () = wait_for_flag(&mut done_rx) => return Err(ExecutorError::Stopped),
        }

        match task.state() {
            TaskState::Done => task.take_result().ok_or_else(|| {
                ExecutorError::Internal(TaskError::Internal(
                    "finished task had no stored result".into(),
                ))
            }),
            TaskState::Rejected => {
                let details = task.details();
                let context = match (&details.provider_name, &details.agreement_id) {
                    (Some(provider), Some(agreement)) => {
                        format!(" on provider {provider} (agreement {agreement})")
                    }
                    _ => String::new(),
                };
                Err(ExecutorError::TaskRejected {
                    task_id: details.id,
                    context,
                    source: task.error().unwrap_or_else(|| {
                        TaskError::Internal("rejected task had no stored error".into())
                    }),
                })
            }
            state => Err(ExecutorError::Internal(TaskError::Internal(format!(
                "task settled in unexpected state {state:?}"
            )))),
        }
    }

    /// Idempotent shutdown: the first caller drives the sequence, concurrent
    /// and repeated calls resolve against the same in-flight operation.
    ///
    /// Stops accepting work, stops the scheduler loop, lets in-flight
    /// executions drain naturally, drains the pool, summarizes telemetry,
    /// and emits terminal lifecycle events.
    pub async fn shutdown(&self) -> Result<(), ExecutorError> {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            let mut rx = self.shutdown_done.subscribe();
            wait_for_flag(&mut rx).await;
            return Ok(());
        }

        tracing::info!("executor shutting down");
        self.events.emit(ExecutorEvent::BeforeShutdown);
        self.accepting.store(false, Ordering::Release);
        self.service.end();

        let handle = self.service_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        while self.service.active_count() > 0 {
            tokio::time::sleep(self.config.queue_poll_interval).await;
        }
        if let Some(watchdog) = self.watchdog_handle.lock().take() {
            watchdog.abort();
        }

        let drain_result = self.pool.drain().await;

        let summary = self.stats.snapshot();
        tracing::info!(
            retries = summary.retries,
            completed = summary.completed,
            failed = summary.failed,
            costs = summary.costs,
            duration_ms = summary.duration_ms,
            "executor telemetry summary"
        );

        self.events.emit(ExecutorEvent::ShutdownComplete);
        let _ = self.shutdown_done.send(true);
        drain_result.map_err(ExecutorError::Pool)
    }

    /// Explicit host-invoked cancellation; routes through the same path as
    /// [`RentalExecutor::shutdown`].
    pub async fn cancel(&self, reason: &str) -> Result<(), ExecutorError> {
        tracing::warn!(reason, "executor cancellation requested");
        self.shutdown().await
    }

    /// Subscribe to the lifecycle event stream.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutorEvent> {
        self.events.subscribe()
    }

    /// Aggregated telemetry so far.
    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the executor is accepting new work.
    pub fn is_running(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Tasks currently executing.
    pub fn active_tasks(&self) -> usize {
        self.service.active_count()
    }

    /// Total retry transitions across all tasks so far.
    pub fn total_retries(&self) -> u64 {
        self.service.retries_total()
    }

    /// Liveness guard: if zero rental acquisitions succeeded within the
    /// startup window, either escalate to a critical shutdown or degrade to
    /// a warning, per configuration.
    fn spawn_watchdog(self: &Arc<Self>) {
        let window = self.config.startup_window;
        let fatal = self.config.exit_on_startup_stall;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let Some(executor) = weak.upgrade() else {
                return;
            };
            if executor.service.acquired_total() > 0 {
                return;
            }
            if fatal {
                let reason =
                    format!("no rental acquired within the {window:?} startup window");
                tracing::error!(%reason, "startup watchdog fired");
                executor
                    .events
                    .emit(ExecutorEvent::CriticalError {
                        reason: reason.clone(),
                    });
                // Shut down from a separate task so aborting the watchdog
                // handle can never cancel the shutdown sequence itself.
                tokio::spawn(async move {
                    if let Err(error) = executor.shutdown().await {
                        tracing::error!(%error, "shutdown after startup watchdog failed");
                    }
                });
            } else {
                tracing::warn!(?window, "no rental acquired within the startup window");
            }
        });
        *self.watchdog_handle.lock() = Some(handle);
    }
}

async fn wait_for_flag(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
