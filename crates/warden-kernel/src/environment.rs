//! The world the kernel acts in.

use std::collections::HashMap;

use anyhow::Result;
use warden_rl::Action;

/// Sensor name to reading.
pub type Readings = HashMap<String, f64>;

/// What the environment reports back after an action.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub reward: f64,

    /// Readings after the action. `None` reuses the pre-action state.
    pub next_readings: Option<Readings>,

    /// Ends the current episode.
    pub done: bool,
}

impl Feedback {
    pub fn new(reward: f64) -> Self {
        Self {
            reward,
            next_readings: None,
            done: false,
        }
    }

    pub fn with_next_readings(mut self, readings: Readings) -> Self {
        self.next_readings = Some(readings);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Errors from either method are treated as cycle faults by the kernel.
pub trait Environment {
    /// Current sensor snapshot.
    fn sense(&mut self) -> Result<Readings>;

    /// Carry out `action` and report its reward.
    fn execute(&mut self, action: &Action, readings: &Readings) -> Result<Feedback>;
}
