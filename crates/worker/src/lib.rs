//! The Sparkle worker: configuration, logging setup, and the loop that
//! takes generation jobs off the queue and reports results back to chat.

pub mod config;
pub mod orchestrator;
pub mod stage;
pub mod telemetry;
