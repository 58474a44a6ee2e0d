//! States, actions, transitions, and sensor-to-state conversion.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, RlError};

/// Numeric snapshot the engine decides on.
///
/// Feature order must match the approximator's input layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub features: Vec<f64>,
    pub id: String,
    #[serde(default)]
    pub reward: f64,
    #[serde(default)]
    pub terminal: bool,
}

impl State {
    pub fn new(features: Vec<f64>, id: impl Into<String>) -> Self {
        Self {
            features,
            id: id.into(),
            reward: 0.0,
            terminal: false,
        }
    }

    /// State with a fresh unique id.
    pub fn from_features(features: Vec<f64>) -> Self {
        Self::new(features, format!("state_{}", Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    /// `parameters[0]` carries the discrete action index.
    pub parameters: Vec<f64>,
    #[serde(default)]
    pub expected_reward: f64,
}

impl Action {
    pub fn new(id: impl Into<String>, parameters: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            parameters,
            expected_reward: 0.0,
        }
    }

    pub fn discrete(index: usize) -> Self {
        Self::new(format!("action_{index}"), vec![index as f64])
    }

    /// Discrete index, if `parameters[0]` is a non-negative integer.
    pub fn index(&self) -> Option<usize> {
        let raw = *self.parameters.first()?;
        if raw.is_finite() && raw >= 0.0 && raw.fract() == 0.0 {
            Some(raw as usize)
        } else {
            None
        }
    }
}

const ACTION_LABELS: [&str; 4] = ["explore", "exploit", "learn", "adapt"];

/// Conventional name of a discrete action in the default four-action family.
pub fn action_label(index: usize) -> Option<&'static str> {
    ACTION_LABELS.get(index).copied()
}

/// Every discrete action for a family of `action_count`.
pub fn possible_actions(action_count: usize) -> Vec<Action> {
    (0..action_count).map(Action::discrete).collect()
}

/// One observed transition. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub state: State,
    pub action: Action,
    pub reward: f64,
    pub next_state: State,
    pub done: bool,
    pub timestamp: DateTime<Utc>,
}

impl Experience {
    pub fn new(state: State, action: Action, reward: f64, next_state: State, done: bool) -> Self {
        Self {
            state,
            action,
            reward,
            next_state,
            done,
            timestamp: Utc::now(),
        }
    }
}

/// Joint min-max normalization. All-equal input maps to all zeros.
pub fn normalize_features(features: &[f64]) -> Vec<f64> {
    let (min, max) = features
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });

    if max > min {
        let range = max - min;
        features.iter().map(|x| (x - min) / range).collect()
    } else {
        vec![0.0; features.len()]
    }
}

/// Fixed, explicit order in which sensor readings become features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorLayout {
    names: Vec<String>,
}

impl SensorLayout {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(RlError::EmptySensorLayout);
        }
        let mut seen = BTreeSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(RlError::DuplicateSensor(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Raw readings in layout order. NaN and infinite readings are rejected.
    pub fn collect(&self, readings: &HashMap<String, f64>) -> Result<Vec<f64>> {
        self.names
            .iter()
            .map(|name| match readings.get(name) {
                None => Err(RlError::MissingSensor(name.clone())),
                Some(&value) if !value.is_finite() => Err(RlError::NonFiniteReading {
                    name: name.clone(),
                    value,
                }),
                Some(&value) => Ok(value),
            })
            .collect()
    }

    /// Normalized state built from a sensor snapshot. Extra readings are ignored.
    pub fn build_state(&self, readings: &HashMap<String, f64>) -> Result<State> {
        let raw = self.collect(readings)?;
        Ok(State::from_features(normalize_features(&raw)))
    }
}
