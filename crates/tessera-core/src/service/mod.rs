//! Services composed over repository traits.

pub mod secret;
