//! Decision engine hyper-parameters.

use serde::{Deserialize, Serialize};

use crate::{Result, RlError, TrainMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Feature vector length
    pub state_size: usize,

    /// Size of the discrete action family
    pub action_size: usize,

    pub hidden_size: usize,

    pub learning_rate: f64,

    /// Replay buffer capacity
    pub buffer_capacity: usize,

    /// Experiences sampled per `learn()` call
    pub batch_size: usize,

    /// Discount factor
    pub gamma: f64,

    /// Exploration rate after `initialize()`
    pub initial_exploration_rate: f64,

    pub epsilon_decay: f64,

    pub epsilon_min: f64,

    /// `learn()` calls between target network syncs
    pub update_frequency: usize,

    pub train_mode: TrainMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_size: 10,
            action_size: 4,
            hidden_size: 128,
            learning_rate: 0.001,
            buffer_capacity: 10_000,
            batch_size: 32,
            gamma: 0.99,
            initial_exploration_rate: 1.0,
            epsilon_decay: 0.995,
            epsilon_min: 0.01,
            update_frequency: 100,
            train_mode: TrainMode::OutputLayer,
        }
    }
}

fn unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RlError::InvalidConfig(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}

impl EngineConfig {
    pub fn new(state_size: usize, action_size: usize) -> Self {
        Self {
            state_size,
            action_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("state_size", self.state_size),
            ("action_size", self.action_size),
            ("hidden_size", self.hidden_size),
            ("buffer_capacity", self.buffer_capacity),
            ("batch_size", self.batch_size),
            ("update_frequency", self.update_frequency),
        ] {
            if value == 0 {
                return Err(RlError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.batch_size > self.buffer_capacity {
            return Err(RlError::InvalidConfig(format!(
                "batch_size {} exceeds buffer_capacity {}",
                self.batch_size, self.buffer_capacity
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RlError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        unit("gamma", self.gamma)?;
        unit("initial_exploration_rate", self.initial_exploration_rate)?;
        unit("epsilon_min", self.epsilon_min)?;
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return Err(RlError::InvalidConfig(format!(
                "epsilon_decay must lie in (0, 1], got {}",
                self.epsilon_decay
            )));
        }
        Ok(())
    }
}
