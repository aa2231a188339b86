//! Shared domain types for Tessera.
//!
//! This crate contains the data model used across the engine: units and their
//! steps, execution logs, checkpoint documents, engine configuration, and the
//! shared error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod secret;
pub mod unit;
