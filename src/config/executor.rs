//! Executor and task policy configuration structures.
//!
//! The serde-facing `*Config`/`*File` forms carry raw integers (including a
//! signed retry count so a negative value is representable and rejected);
//! `validate()` converts them into the typed forms the scheduler consumes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Validated retry/timeout policy for one task.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Maximum number of retry transitions before a failure forces rejection.
    pub max_retries: u32,
    /// Bound on one execution attempt, measured from start.
    pub timeout: Option<Duration>,
    /// Bound on the time between queuing and actually starting.
    pub startup_timeout: Option<Duration>,
    /// Whether a timeout makes the task eligible for retry.
    pub retry_on_timeout: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: None,
            startup_timeout: None,
            retry_on_timeout: false,
        }
    }
}

/// Raw, serde-facing task options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptionsConfig {
    /// Maximum retries; negative values are a configuration error.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    /// Execution timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Startup timeout in milliseconds.
    #[serde(default)]
    pub startup_timeout_ms: Option<u64>,
    /// Whether timeouts are retryable.
    #[serde(default)]
    pub retry_on_timeout: bool,
}

fn default_max_retries() -> i64 {
    3
}

impl Default for TaskOptionsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: None,
            startup_timeout_ms: None,
            retry_on_timeout: false,
        }
    }
}

impl TaskOptionsConfig {
    /// Validate raw values and produce typed task options.
    pub fn validate(&self) -> Result<TaskOptions, String> {
        if self.max_retries < 0 {
            return Err(format!(
                "max_retries must be >= 0, got {}",
                self.max_retries
            ));
        }
        let max_retries = u32::try_from(self.max_retries)
            .map_err(|_| format!("max_retries out of range: {}", self.max_retries))?;
        Ok(TaskOptions {
            max_retries,
            timeout: self.timeout_ms.map(Duration::from_millis),
            startup_timeout: self.startup_timeout_ms.map(Duration::from_millis),
            retry_on_timeout: self.retry_on_timeout,
        })
    }
}

/// Validated executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of tasks concurrently in `Pending`.
    pub max_parallel_tasks: usize,
    /// Default task policy, merged with per-run overrides.
    pub task_defaults: TaskOptions,
    /// Startup watchdog window: the executor must see at least one rental
    /// acquisition within it.
    pub startup_window: Duration,
    /// Whether a silent startup window is fatal (shutdown) or a warning.
    pub exit_on_startup_stall: bool,
    /// Idle backoff for the scheduler's dequeue loop.
    pub queue_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 5,
            task_defaults: TaskOptions::default(),
            startup_window: Duration::from_secs(90),
            exit_on_startup_stall: true,
            queue_poll_interval: Duration::from_millis(50),
        }
    }
}

impl ExecutorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_parallel_tasks == 0 {
            return Err("max_parallel_tasks must be greater than 0".into());
        }
        if self.startup_window.is_zero() {
            return Err("startup_window must be greater than 0".into());
        }
        if self.queue_poll_interval.is_zero() {
            return Err("queue_poll_interval must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse executor configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let file: ExecutorConfigFile =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        file.validate()
    }
}

/// Raw, serde-facing executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfigFile {
    /// Parallelism ceiling.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_tasks: i64,
    /// Default task policy.
    #[serde(default)]
    pub task_defaults: TaskOptionsConfig,
    /// Startup watchdog window in seconds.
    #[serde(default = "default_startup_window_secs")]
    pub startup_window_secs: u64,
    /// Whether a silent startup window is fatal.
    #[serde(default = "default_true")]
    pub exit_on_startup_stall: bool,
    /// Dequeue loop idle backoff in milliseconds.
    #[serde(default = "default_poll_ms")]
    pub queue_poll_interval_ms: u64,
}

fn default_max_parallel() -> i64 {
    5
}

fn default_startup_window_secs() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_poll_ms() -> u64 {
    50
}

impl ExecutorConfigFile {
    /// Validate raw values and produce a typed configuration.
    pub fn validate(&self) -> Result<ExecutorConfig, String> {
        if self.max_parallel_tasks <= 0 {
            return Err(format!(
                "max_parallel_tasks must be greater than 0, got {}",
                self.max_parallel_tasks
            ));
        }
        let cfg = ExecutorConfig {
            max_parallel_tasks: usize::try_from(self.max_parallel_tasks)
                .map_err(|_| format!("max_parallel_tasks out of range: {}", self.max_parallel_tasks))?,
            task_defaults: self.task_defaults.validate()?,
            startup_window: Duration::from_secs(self.startup_window_secs),
            exit_on_startup_stall: self.exit_on_startup_stall,
            queue_poll_interval: Duration::from_millis(self.queue_poll_interval_ms),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
