//! Compliance gate for the decision engine.
//!
//! A [`PolicyEngine`] owns a set of leveled [`Policy`] values whose `rules` maps
//! are interpreted against an [`OperationContext`]. Callers ask
//! [`PolicyEngine::can_execute_operation`] before acting; the engine answers
//! with a boolean and records every denial as a [`PolicyViolation`].

#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod policy;
pub mod rule;

pub use config::{
    default_starter_policies, PolicyConfig, ETHICS_POLICY_ID, PERFORMANCE_POLICY_ID,
    SAFETY_POLICY_ID,
};
pub use engine::{EnforcementState, Lifecycle, PolicyEngine, PolicyStatus};
pub use policy::{Policy, PolicyLevel, PolicyViolation};
pub use rule::{OperationContext, Rule, Verdict};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid starter policy set: {0}")]
    InvalidStarterSet(String),

    #[error("Policy with id '{0}' already exists")]
    DuplicatePolicy(String),

    #[error("Policy id must not be empty")]
    EmptyPolicyId,

    #[error("Policy engine is not ready")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, PolicyError>;
