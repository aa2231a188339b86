//! Observability for Tessera: subscriber initialization and log scrubbing.

pub mod sanitizing_writer;
pub mod tracing_setup;
