//! Warden kernel - drives a gated decision engine against an environment.
//!
//! This crate wires a [`warden_policy::PolicyEngine`] and a
//! [`warden_rl::DecisionEngine`] into one cycle, recovers from cycle faults,
//! and loads the combined YAML configuration.

#![forbid(unsafe_code)]

pub mod config;
pub mod environment;
pub mod kernel;

pub use config::KernelConfig;
pub use environment::{Environment, Feedback, Readings};
pub use kernel::{CycleOutcome, Kernel, RunSummary, Telemetry, CYCLE_ERROR};
