//! # Rental Executor
//!
//! A bounded-concurrency task scheduler with per-task retry/timeout state
//! machines, running caller-supplied work against an external pool of
//! leasable execution resources ("rentals").
//!
//! The executor coordinates task lifecycle, enforces a parallelism ceiling,
//! retries failed work with resource reassignment, and guarantees clean
//! resource release under every exit path: success, failure, timeout, and
//! cancellation.
//!
//! ## Core Pieces
//!
//! - **[`core::Task`]**: state machine for one unit of work
//!   (`New -> Queued -> Pending -> Done/Retry/Rejected`) with startup and
//!   execution timers.
//! - **[`core::TaskQueue`]**: FIFO holding area; retries re-enter at the head
//!   so previously started work jumps ahead of fresh submissions.
//! - **[`core::TaskService`]**: the scheduler loop; leases one rental per
//!   task, never exceeds `max_parallel_tasks`, and disposes of every lease
//!   exactly once.
//! - **[`core::RentalExecutor`]**: public facade with `run`, idempotent
//!   `shutdown`, explicit `cancel`, a lifecycle event stream, and a startup
//!   watchdog.
//! - **[`pool::RentalPool`]**: the external collaborator boundary; an
//!   in-memory implementation lives in [`pool::InMemoryRentalPool`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rental_executor::config::ExecutorConfig;
//! use rental_executor::core::RentalExecutor;
//! use rental_executor::pool::InMemoryRentalPool;
//!
//! let pool = Arc::new(InMemoryRentalPool::new(4, MyUnit::new));
//! let executor = RentalExecutor::start(pool, ExecutorConfig::default())?;
//!
//! let result: String = executor
//!     .run(|unit| async move { unit.exec("echo hello").await })
//!     .await?;
//!
//! executor.shutdown().await?;
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Core scheduling: task, queue, service, executor facade, stats, events.
pub mod core;
/// Configuration models for the executor and task policies.
pub mod config;
/// Rental pool boundary and the in-memory implementation.
pub mod pool;
/// Shared utilities.
pub mod util;
