//! Domain core of the Sparkle image-generation worker.
//!
//! Everything in here is free of I/O: job parsing and defaulting, the
//! human-readable job summary, grid composition of generated images, the
//! retry backoff schedule, and the error-policy table the worker loop
//! consults when a job fails.

pub mod backoff;
pub mod compose;
pub mod error;
pub mod job;
pub mod message;
pub mod policy;
pub mod types;
