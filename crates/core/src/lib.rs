#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and pure logic for running interview batches.
//!
//! Nothing in this crate performs I/O: the job state machine, wire types,
//! progress reporting seam and cost reconciliation live here so that both
//! the remote and local execution paths (and offline tooling) agree on them.

pub mod api;
pub mod cost;
pub mod model;
pub mod progress;

mod util;

pub use util::{new_ulid, now_ms};
