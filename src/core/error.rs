//! Error types for the scheduler, the executor facade, and the rental pool
//! boundary.

use std::time::Duration;

use thiserror::Error;

/// Errors attached to a single task's lifecycle.
///
/// The variants form the retry-eligibility taxonomy: execution-layer failures
/// are retryable by default, timeouts only when the task opted in, and
/// configuration or invariant violations never.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Invalid task options, detected before any queue interaction.
    #[error("invalid task configuration: {0}")]
    Config(String),
    /// The task did not acquire a rental and start within its startup window.
    #[error("task startup timed out after {0:?}")]
    StartupTimeout(Duration),
    /// One execution attempt exceeded the task's execution timeout.
    #[error("task execution timed out after {0:?}")]
    ExecutionTimeout(Duration),
    /// The work function or execution unit failed.
    #[error("execution failed: {0}")]
    Execution(String),
    /// Invariant violation (double start, bad enqueue); a programming error
    /// upstream, never retried and never silently swallowed.
    #[error("internal scheduler error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Whether this error was synthesized by a startup or execution timer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StartupTimeout(_) | Self::ExecutionTimeout(_))
    }

    /// Whether the failure originated in the execution layer (the work
    /// function, the execution unit, or the lease it ran on). Rentals that
    /// witnessed such a failure are presumed compromised.
    pub fn is_execution_layer(&self) -> bool {
        matches!(self, Self::Execution(_)) || self.is_timeout()
    }

    /// Retry eligibility for this error under the task's timeout policy.
    pub fn retryable(&self, retry_on_timeout: bool) -> bool {
        match self {
            Self::Execution(_) => true,
            Self::StartupTimeout(_) | Self::ExecutionTimeout(_) => retry_on_timeout,
            Self::Config(_) | Self::Internal(_) => false,
        }
    }
}

/// Errors produced at the rental pool boundary.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The pool is draining and no longer hands out rentals.
    #[error("rental pool is draining")]
    Draining,
    /// Backend-specific failure with context.
    #[error("rental pool backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to callers of the executor facade.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Configuration validation failed at construction.
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),
    /// The executor was shut down while the caller was waiting on a task.
    #[error("executor has been shut down")]
    Stopped,
    /// The task reached `Rejected`; the stored error, wrapped with
    /// operational context where available.
    #[error("task {task_id} failed{context}: {source}")]
    TaskRejected {
        /// Identifier of the rejected task.
        task_id: String,
        /// Provider/agreement context, empty when the task never started.
        context: String,
        /// The error stored on the task.
        source: TaskError,
    },
    /// A rental pool operation failed.
    #[error("rental pool error: {0}")]
    Pool(#[from] PoolError),
    /// Scheduler-internal failure while submitting or tracking the task.
    #[error("scheduler error: {0}")]
    Internal(#[from] TaskError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_errors_are_retryable_by_default() {
        let err = TaskError::Execution("boom".into());
        assert!(err.retryable(false));
        assert!(err.is_execution_layer());
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeouts_honor_the_retry_on_timeout_flag() {
        let startup = TaskError::StartupTimeout(Duration::from_secs(1));
        let exec = TaskError::ExecutionTimeout(Duration::from_secs(1));
        assert!(!startup.retryable(false));
        assert!(startup.retryable(true));
        assert!(!exec.retryable(false));
        assert!(exec.retryable(true));
        assert!(exec.is_timeout());
    }

    #[test]
    fn config_and_internal_errors_are_never_retryable() {
        assert!(!TaskError::Config("bad".into()).retryable(true));
        assert!(!TaskError::Internal("bug".into()).retryable(true));
    }
}
