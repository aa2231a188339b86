//! Infrastructure layer for Tessera.
//!
//! Implementations of the repository traits defined in `tessera-core`:
//! JSON-file and SQLite checkpoint stores, environment and static secret
//! providers, configuration loading, and the wiring that assembles an
//! `ExecutionEngine` from a data directory.

pub mod bootstrap;
pub mod checkpoint;
pub mod config;
pub mod secret;
pub mod sqlite;
