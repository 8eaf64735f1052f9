//! Configuration models for the executor and per-task policies.

pub mod executor;

pub use executor::{ExecutorConfig, ExecutorConfigFile, TaskOptions, TaskOptionsConfig};
