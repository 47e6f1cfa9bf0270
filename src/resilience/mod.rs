//! Failure handling for the remote path.
//!
//! - [`circuit_breaker`]: stops remote dispatch after repeated failures
//! - [`retry`]: exponential backoff for startup connects

pub mod circuit_breaker;
pub mod retry;
