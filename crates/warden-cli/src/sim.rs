//! Simulated host metrics for demo runs.

use anyhow::Result;
use warden_kernel::{Environment, Feedback, Readings};
use warden_rl::Action;

const BASE_REWARD: f64 = 0.1;
const HIGH_CPU: f64 = 80.0;
const HIGH_CPU_PENALTY: f64 = 0.2;

/// Extra reward per discrete action: explore, exploit, learn, adapt.
const ACTION_BONUS: [f64; 4] = [0.2, 0.3, 0.4, 0.5];

/// Readings drift in short sawtooth cycles around fixed baselines.
#[derive(Debug, Default)]
pub struct SimulatedHost {
    cycle: u64,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn readings_at(cycle: u64) -> Readings {
        [
            ("cpu_usage", 45.2 + (cycle % 10) as f64),
            ("memory_usage", 67.8 + (cycle % 5) as f64),
            ("network_activity", 23.1 + (cycle % 15) as f64),
            ("user_interaction_rate", 12.5 + (cycle % 8) as f64),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }

    pub fn reward(action: &Action, readings: &Readings) -> f64 {
        let bonus = action
            .index()
            .and_then(|i| ACTION_BONUS.get(i))
            .copied()
            .unwrap_or(0.0);
        let penalty = match readings.get("cpu_usage") {
            Some(cpu) if *cpu > HIGH_CPU => HIGH_CPU_PENALTY,
            _ => 0.0,
        };
        BASE_REWARD + bonus - penalty
    }
}

impl Environment for SimulatedHost {
    fn sense(&mut self) -> Result<Readings> {
        self.cycle += 1;
        Ok(Self::readings_at(self.cycle))
    }

    fn execute(&mut self, action: &Action, readings: &Readings) -> Result<Feedback> {
        let reward = Self::reward(action, readings);
        Ok(Feedback::new(reward).with_next_readings(Self::readings_at(self.cycle + 1)))
    }
}
