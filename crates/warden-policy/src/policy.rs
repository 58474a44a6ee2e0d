//! Policy model - named, leveled rule sets and the violation log entry.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::{OperationContext, Rule, Verdict};

/// Severity / priority of a policy. Orders CRITICAL first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    #[serde(alias = "CRITICAL")]
    Critical,
    #[serde(alias = "HIGH")]
    High,
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "LOW")]
    Low,
}

impl PolicyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyLevel::Critical => "critical",
            PolicyLevel::High => "high",
            PolicyLevel::Medium => "medium",
            PolicyLevel::Low => "low",
        }
    }
}

impl fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_active() -> bool {
    true
}

/// A compliance policy.
///
/// `rules` is interpreted data: every entry is parsed into a [`Rule`] at
/// evaluation time, so a policy's behavior is fully described by its map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique identifier within an engine
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// What the policy protects
    #[serde(default)]
    pub description: String,

    pub level: PolicyLevel,

    /// Rule key -> rule value
    #[serde(default)]
    pub rules: BTreeMap<String, String>,

    #[serde(default = "default_active")]
    pub active: bool,
}

impl Policy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        level: PolicyLevel,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            level,
            rules: BTreeMap::new(),
            active: true,
        }
    }

    pub fn with_rule(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rules.insert(key.into(), value.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.level == PolicyLevel::Critical
    }

    /// Evaluate every rule against `ctx`; the first denial wins.
    pub fn evaluate(&self, ctx: &OperationContext) -> Verdict {
        for (key, value) in &self.rules {
            let rule = Rule::parse(key, value);
            if let Verdict::Deny { reason } = rule.evaluate(ctx) {
                return Verdict::Deny {
                    reason: format!("{key}: {reason}"),
                };
            }
        }
        Verdict::Allow
    }
}

/// Append-only violation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub timestamp: DateTime<Utc>,
    pub policy_id: String,
    pub violation_type: String,
    pub severity: PolicyLevel,
    pub description: String,
}

impl PolicyViolation {
    pub fn new(
        policy_id: impl Into<String>,
        violation_type: impl Into<String>,
        severity: PolicyLevel,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            policy_id: policy_id.into(),
            violation_type: violation_type.into(),
            severity,
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_critical_first() {
        let mut levels = vec![
            PolicyLevel::Low,
            PolicyLevel::Critical,
            PolicyLevel::Medium,
            PolicyLevel::High,
        ];
        levels.sort();
        assert_eq!(
            levels,
            vec![
                PolicyLevel::Critical,
                PolicyLevel::High,
                PolicyLevel::Medium,
                PolicyLevel::Low
            ]
        );
    }

    #[test]
    fn evaluate_reports_the_denying_key() {
        let policy = Policy::new("p", "P", "", PolicyLevel::High).with_rule("max_cpu_usage", "90");
        let ctx = OperationContext::new("learning").with_metric("cpu_usage", 95.0);
        match policy.evaluate(&ctx) {
            Verdict::Deny { reason } => assert!(reason.starts_with("max_cpu_usage")),
            Verdict::Allow => panic!("expected denial"),
        }
    }

    #[test]
    fn first_denial_in_key_order_wins() {
        let policy = Policy::new("p", "P", "", PolicyLevel::High)
            .with_rule("max_memory_usage", "50")
            .with_rule("max_cpu_usage", "90");
        let ctx = OperationContext::new("learning")
            .with_metric("cpu_usage", 95.0)
            .with_metric("memory_usage", 70.0);
        match policy.evaluate(&ctx) {
            Verdict::Deny { reason } => assert!(reason.starts_with("max_cpu_usage"), "{reason}"),
            Verdict::Allow => panic!("expected denial"),
        }
    }
}
