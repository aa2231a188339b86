//! Secret hygiene for everything the engine persists or logs.

pub mod sanitizer;
