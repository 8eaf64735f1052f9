//! Core scheduling: task state machine, queue, scheduler loop, executor
//! facade, telemetry aggregation, and lifecycle events.

pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod service;
pub mod stats;
pub mod task;

pub use error::{ExecutorError, PoolError, TaskError};
pub use events::{EventBus, ExecutorEvent};
pub use executor::RentalExecutor;
pub use queue::TaskQueue;
pub use service::TaskService;
pub use stats::{StatsService, StatsSnapshot};
pub use task::{
    BoxWorkFuture, Subscription, Task, TaskDetails, TaskState, TaskTransition, WorkFn,
    WorkResult,
};
