//! Kernel configuration loading and management.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use warden_policy::{PolicyConfig, SAFETY_POLICY_ID};
use warden_rl::EngineConfig;

/// Path of the config file under a project root.
pub const CONFIG_PATH: &str = ".warden/config.yaml";

/// Combined configuration, loaded from .warden/config.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Sensor names in feature order
    #[serde(default = "default_sensors")]
    pub sensors: Vec<String>,

    /// Decision engine hyper-parameters
    #[serde(default = "default_engine")]
    pub engine: EngineConfig,

    /// Starter policies and escalation behaviour
    pub policy: PolicyConfig,

    /// Operation tag checked before every action
    #[serde(default = "default_gate_operation")]
    pub gate_operation: String,

    /// Policy that cycle faults are reported against
    #[serde(default = "default_fault_policy_id")]
    pub fault_policy_id: String,

    /// Pause after a fault or a blocked cycle
    #[serde(default = "default_fault_backoff_ms")]
    pub fault_backoff_ms: u64,

    /// Pause between completed cycles
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// Log a progress line every N cycles (0 disables)
    #[serde(default = "default_report_every")]
    pub report_every: u64,
}

fn default_sensors() -> Vec<String> {
    [
        "cpu_usage",
        "memory_usage",
        "network_activity",
        "user_interaction_rate",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_engine() -> EngineConfig {
    EngineConfig::new(default_sensors().len(), 4)
}
fn default_gate_operation() -> String {
    "reinforcement_learning".to_string()
}
fn default_fault_policy_id() -> String {
    SAFETY_POLICY_ID.to_string()
}
fn default_fault_backoff_ms() -> u64 {
    1000
}
fn default_cycle_interval_ms() -> u64 {
    100
}
fn default_report_every() -> u64 {
    100
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sensors: default_sensors(),
            engine: default_engine(),
            policy: PolicyConfig::default(),
            gate_operation: default_gate_operation(),
            fault_policy_id: default_fault_policy_id(),
            fault_backoff_ms: default_fault_backoff_ms(),
            cycle_interval_ms: default_cycle_interval_ms(),
            report_every: default_report_every(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .warden/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_PATH);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Cross-section checks the per-engine validators cannot see.
    pub fn validate(&self) -> Result<()> {
        if self.sensors.is_empty() {
            bail!("At least one sensor must be configured");
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = self.sensors.iter().find(|s| !seen.insert(s.as_str())) {
            bail!("Sensor '{dup}' is listed twice");
        }
        if self.engine.state_size != self.sensors.len() {
            bail!(
                "engine.state_size is {} but {} sensors are configured",
                self.engine.state_size,
                self.sensors.len()
            );
        }
        if self.gate_operation.is_empty() {
            bail!("gate_operation must not be empty");
        }
        self.engine.validate().context("Invalid engine section")?;
        self.policy.validate().context("Invalid policy section")?;
        Ok(())
    }
}
