//! Rule interpreter.
//!
//! A policy's `rules` map is a small declarative language. Each `(key, value)`
//! pair parses into one [`Rule`]:
//!
//! | key                         | value            | denies when                                   |
//! |-----------------------------|------------------|-----------------------------------------------|
//! | `max_<metric>`              | number           | context reports `<metric>` above the bound     |
//! | `<metric>_limit`            | number           | same as `max_<metric>`                         |
//! | `min_<metric>`              | number           | context reports `<metric>` below the bound     |
//! | `deny_operations`           | `a,b,c`          | operation is listed                            |
//! | `allow_operations`          | `a,b,c`          | operation is not listed                        |
//! | `<name>`                    | `true`/`required`| context asserts `<name> = false`               |
//! | `<name>`                    | `false`/`forbidden` | context asserts `<name> = true`             |
//!
//! Anything else is a [`Rule::Note`] and never denies. Metrics and assertions
//! absent from the context never deny. A numeric bound that fails to parse
//! denies every operation until it is fixed.

use std::collections::BTreeMap;

/// What the caller wants to do, plus whatever facts it can report about it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationContext {
    operation: String,
    metrics: BTreeMap<String, f64>,
    assertions: BTreeMap<String, bool>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            metrics: BTreeMap::new(),
            assertions: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_assertion(mut self, name: impl Into<String>, holds: bool) -> Self {
        self.assertions.insert(name.into(), holds);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn assertion(&self, name: &str) -> Option<bool> {
        self.assertions.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    fn deny(reason: impl Into<String>) -> Self {
        Verdict::Deny {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    MaxMetric { metric: String, bound: f64 },
    MinMetric { metric: String, bound: f64 },
    DenyOperations(Vec<String>),
    AllowOperations(Vec<String>),
    Requirement { name: String },
    Prohibition { name: String },
    Malformed { key: String, value: String },
    Note { key: String, value: String },
}

impl Rule {
    pub fn parse(key: &str, value: &str) -> Self {
        let key = key.trim();
        let value = value.trim();

        match key {
            "deny_operations" => return Rule::DenyOperations(split_list(value)),
            "allow_operations" => return Rule::AllowOperations(split_list(value)),
            _ => {}
        }

        if let Some(metric) = key.strip_prefix("max_") {
            return bound_rule(key, value, metric, |metric, bound| Rule::MaxMetric {
                metric,
                bound,
            });
        }
        if let Some(metric) = key.strip_suffix("_limit") {
            return bound_rule(key, value, metric, |metric, bound| Rule::MaxMetric {
                metric,
                bound,
            });
        }
        if let Some(metric) = key.strip_prefix("min_") {
            return bound_rule(key, value, metric, |metric, bound| Rule::MinMetric {
                metric,
                bound,
            });
        }

        match value.to_ascii_lowercase().as_str() {
            "true" | "required" => Rule::Requirement {
                name: key.to_string(),
            },
            "false" | "forbidden" => Rule::Prohibition {
                name: key.to_string(),
            },
            _ => Rule::Note {
                key: key.to_string(),
                value: value.to_string(),
            },
        }
    }

    /// Whether this rule can ever deny.
    pub fn is_enforcing(&self) -> bool {
        !matches!(self, Rule::Note { .. })
    }

    pub fn evaluate(&self, ctx: &OperationContext) -> Verdict {
        match self {
            Rule::MaxMetric { metric, bound } => match ctx.metric(metric) {
                Some(v) if v.is_nan() => Verdict::deny(format!("{metric} is NaN")),
                Some(v) if v > *bound => {
                    Verdict::deny(format!("{metric}={v} exceeds max {bound}"))
                }
                _ => Verdict::Allow,
            },
            Rule::MinMetric { metric, bound } => match ctx.metric(metric) {
                Some(v) if v.is_nan() => Verdict::deny(format!("{metric} is NaN")),
                Some(v) if v < *bound => {
                    Verdict::deny(format!("{metric}={v} below min {bound}"))
                }
                _ => Verdict::Allow,
            },
            Rule::DenyOperations(ops) => {
                if ops.iter().any(|op| op == ctx.operation()) {
                    Verdict::deny(format!("operation '{}' is denied", ctx.operation()))
                } else {
                    Verdict::Allow
                }
            }
            Rule::AllowOperations(ops) => {
                if ops.iter().any(|op| op == ctx.operation()) {
                    Verdict::Allow
                } else {
                    Verdict::deny(format!("operation '{}' is not allowed", ctx.operation()))
                }
            }
            Rule::Requirement { name } => match ctx.assertion(name) {
                Some(false) => Verdict::deny(format!("requirement '{name}' not met")),
                _ => Verdict::Allow,
            },
            Rule::Prohibition { name } => match ctx.assertion(name) {
                Some(true) => Verdict::deny(format!("'{name}' is prohibited")),
                _ => Verdict::Allow,
            },
            Rule::Malformed { key, value } => {
                Verdict::deny(format!("malformed rule {key}={value}"))
            }
            Rule::Note { .. } => Verdict::Allow,
        }
    }
}

fn bound_rule(
    key: &str,
    value: &str,
    metric: &str,
    make: impl FnOnce(String, f64) -> Rule,
) -> Rule {
    match value.parse::<f64>() {
        Ok(bound) if !metric.is_empty() && bound.is_finite() => make(metric.to_string(), bound),
        _ => Rule::Malformed {
            key: key.to_string(),
            value: value.to_string(),
        },
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bounds_and_limits() {
        assert_eq!(
            Rule::parse("max_cpu_usage", "90"),
            Rule::MaxMetric {
                metric: "cpu_usage".into(),
                bound: 90.0
            }
        );
        assert_eq!(
            Rule::parse("thread_pool_limit", "8"),
            Rule::MaxMetric {
                metric: "thread_pool".into(),
                bound: 8.0
            }
        );
        assert_eq!(
            Rule::parse("min_battery", " 0.2 "),
            Rule::MinMetric {
                metric: "battery".into(),
                bound: 0.2
            }
        );
    }

    #[test]
    fn unparseable_bound_is_malformed() {
        assert!(matches!(
            Rule::parse("max_cpu_usage", "ninety"),
            Rule::Malformed { .. }
        ));
        assert!(matches!(Rule::parse("max_", "3"), Rule::Malformed { .. }));
    }

    #[test]
    fn flag_values_parse_case_insensitively() {
        assert_eq!(
            Rule::parse("human_oversight", "Required"),
            Rule::Requirement {
                name: "human_oversight".into()
            }
        );
        assert_eq!(
            Rule::parse("self_modification", "FALSE"),
            Rule::Prohibition {
                name: "self_modification".into()
            }
        );
        assert!(!Rule::parse("owner", "ops-team").is_enforcing());
    }

    #[test]
    fn list_rules_trim_entries() {
        assert_eq!(
            Rule::parse("deny_operations", "a, b,,c "),
            Rule::DenyOperations(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn nan_metric_is_denied() {
        let rule = Rule::parse("max_cpu_usage", "90");
        let ctx = OperationContext::new("x").with_metric("cpu_usage", f64::NAN);
        assert!(!rule.evaluate(&ctx).is_allowed());
    }
}
