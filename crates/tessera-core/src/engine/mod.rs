//! Execution engine: spec loading, planning, step dispatch, retries,
//! checkpointing, and the staged executor that ties them together.

pub mod checkpoint;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod postcondition;
pub mod retry;
pub mod step_runner;
