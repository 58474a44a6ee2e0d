//! Policy engine configuration and the starter policy set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Policy, PolicyError, PolicyLevel, Result};

pub const SAFETY_POLICY_ID: &str = "core_safety_001";
pub const PERFORMANCE_POLICY_ID: &str = "core_performance_001";
pub const ETHICS_POLICY_ID: &str = "core_ethics_001";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policies loaded by `initialize()`
    #[serde(default = "default_starter_policies")]
    pub starter_policies: Vec<Policy>,

    /// Enter lockdown as soon as a CRITICAL violation is reported
    pub lockdown_on_critical_violation: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            starter_policies: default_starter_policies(),
            lockdown_on_critical_violation: false,
        }
    }
}

impl PolicyConfig {
    /// Check the starter set is loadable: non-empty unique ids and at least
    /// one CRITICAL policy.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for policy in &self.starter_policies {
            if policy.id.trim().is_empty() {
                return Err(PolicyError::InvalidStarterSet(format!(
                    "policy '{}' has an empty id",
                    policy.name
                )));
            }
            if !seen.insert(policy.id.as_str()) {
                return Err(PolicyError::DuplicatePolicy(policy.id.clone()));
            }
        }
        if !self.starter_policies.iter().any(Policy::is_critical) {
            return Err(PolicyError::InvalidStarterSet(
                "starter set has no CRITICAL policy".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn default_starter_policies() -> Vec<Policy> {
    vec![
        Policy::new(
            SAFETY_POLICY_ID,
            "Safety Protocol",
            "Safety constraints for real-time operations",
            PolicyLevel::Critical,
        )
        .with_rule("real_time_monitoring", "true")
        .with_rule("immediate_shutdown", "true")
        .with_rule("memory_bounds_check", "true"),
        Policy::new(
            PERFORMANCE_POLICY_ID,
            "Performance Optimization",
            "Resource ceilings for learning operations",
            PolicyLevel::High,
        )
        .with_rule("max_cpu_usage", "90")
        .with_rule("max_memory_usage", "85")
        .with_rule("thread_pool_limit", "8"),
        Policy::new(
            ETHICS_POLICY_ID,
            "Learning Ethics Protocol",
            "Ethical constraints for reinforcement learning",
            PolicyLevel::High,
        )
        .with_rule("no_harmful_learning", "true")
        .with_rule("bias_prevention", "true")
        .with_rule("human_oversight", "required"),
    ]
}
