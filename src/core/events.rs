//! Lifecycle event stream for tasks and the executor.

use tokio::sync::broadcast;

/// Events emitted across the executor lifecycle.
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    /// The executor is initialized and accepting work.
    Ready,
    /// Shutdown has begun; no new work will be scheduled.
    BeforeShutdown,
    /// Shutdown finished: service stopped, pool drained.
    ShutdownComplete,
    /// The executor cannot make progress and is shutting down.
    CriticalError {
        /// Human-readable reason.
        reason: String,
    },
    /// A task was accepted into the queue.
    TaskQueued {
        /// Task identifier.
        id: String,
    },
    /// A task acquired a rental and began executing.
    TaskStarted {
        /// Task identifier.
        id: String,
        /// Agreement backing the leased rental.
        agreement_id: Option<String>,
        /// Provider the work runs on.
        provider_name: Option<String>,
    },
    /// A task failed retryably and was re-queued at the head.
    TaskRetried {
        /// Task identifier.
        id: String,
        /// Retry transitions taken so far.
        retries: u32,
    },
    /// A task reached `Done`.
    TaskCompleted {
        /// Task identifier.
        id: String,
    },
    /// A task reached `Rejected`.
    TaskFailed {
        /// Task identifier.
        id: String,
        /// The stored error, rendered.
        error: String,
    },
}

/// Broadcast bus carrying [`ExecutorEvent`]s to any number of observers.
///
/// Emission never blocks and never fails; events sent with no subscribers
/// are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutorEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the stream from this point onward.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: ExecutorEvent) {
        tracing::debug!(?event, "executor event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
