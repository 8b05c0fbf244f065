#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Execution side of interview batches: picks remote or local execution,
//! drives remote jobs to a terminal state and runs batches in-process.

pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod local_runner;
pub mod pool;
pub mod selector;

pub use coordinator::{BackgroundJob, PollMode, Polled, RemoteExecutionCoordinator, RemoteRun};
pub use error::ExecutionError;
pub use selector::{ExecutionOutcome, ExecutionStrategySelector, RunOptions};
