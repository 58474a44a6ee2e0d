//! Value-based decision engine.
//!
//! A [`DecisionEngine`] picks one of a small set of discrete actions from a
//! numeric [`State`], stores observed transitions in a fixed-capacity
//! [`ExperienceBuffer`], and learns action values with an online [`QNetwork`]
//! bootstrapped against a periodically synced target copy.
//!
//! The engine never consults a policy gate itself; callers check their gate
//! before asking for an action.

#![forbid(unsafe_code)]

pub mod abort;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod network;
pub mod state;

pub use abort::AbortHandle;
pub use buffer::ExperienceBuffer;
pub use config::EngineConfig;
pub use engine::{DecisionEngine, EngineTelemetry, LearnOutcome};
pub use network::{NetworkSnapshot, QNetwork, TrainMode};
pub use state::{
    action_label, normalize_features, possible_actions, Action, Experience, SensorLayout, State,
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RlError {
    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Action '{action_id}' does not encode an index below {action_count}")]
    InvalidAction {
        action_id: String,
        action_count: usize,
    },

    #[error("Sensor '{0}' missing from snapshot")]
    MissingSensor(String),

    #[error("Sensor '{name}' reported a non-finite value {value}")]
    NonFiniteReading { name: String, value: f64 },

    #[error("Sensor '{0}' listed twice in layout")]
    DuplicateSensor(String),

    #[error("Sensor layout is empty")]
    EmptySensorLayout,

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("Network snapshot does not fit: {0}")]
    IncompatibleSnapshot(String),

    #[error("Decision engine is not ready")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, RlError>;
