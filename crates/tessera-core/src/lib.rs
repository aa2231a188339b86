//! Core execution logic for Tessera.
//!
//! Graph planning, retry policy, checkpoint management, secret sanitizing,
//! and the execution engine. Depends only on `tessera-types`; storage and
//! secret backends are reached through the repository traits and implemented
//! in `tessera-infra`.

pub mod engine;
pub mod repository;
pub mod security;
pub mod service;
