//! Policy engine - owns the policy set, gates operations, logs violations.
//!
//! Every public operation takes the engine's single lock for its whole
//! duration, so callers on different threads observe transitions atomically
//! and in one order.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::PolicyConfig;
use crate::rule::{OperationContext, Verdict};
use crate::{Policy, PolicyError, PolicyLevel, PolicyViolation};

/// Enforcement switch.
///
/// `Active <-> Disabled` via enable/disable; either enters `Lockdown` via
/// [`PolicyEngine::emergency_lockdown`]. Lockdown has no exit edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementState {
    Active,
    Disabled,
    Lockdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    ShutDown,
}

/// Consistent point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStatus {
    pub lifecycle: Lifecycle,
    pub enforcement: EnforcementState,
    pub policy_count: usize,
    pub active_policy_ids: Vec<String>,
    pub violation_count: usize,
}

#[derive(Debug)]
struct EngineState {
    lifecycle: Lifecycle,
    enforcement: EnforcementState,
    policies: BTreeMap<String, Policy>,
    violations: Vec<PolicyViolation>,
}

impl EngineState {
    fn active_ids(&self) -> Vec<String> {
        self.policies
            .values()
            .filter(|p| p.active)
            .map(|p| p.id.clone())
            .collect()
    }

    fn apply_lockdown(&mut self) -> usize {
        let mut deactivated = 0;
        for policy in self.policies.values_mut() {
            if !policy.is_critical() && policy.active {
                policy.active = false;
                deactivated += 1;
            }
        }
        self.enforcement = EnforcementState::Lockdown;
        deactivated
    }
}

pub struct PolicyEngine {
    config: PolicyConfig,
    state: Mutex<EngineState>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(EngineState {
                lifecycle: Lifecycle::Uninitialized,
                enforcement: EnforcementState::Active,
                policies: BTreeMap::new(),
                violations: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the starter set and arm enforcement.
    ///
    /// The starter set is staged and validated before anything is committed; on
    /// failure the engine stays `Uninitialized` with its policy map untouched.
    pub fn initialize(&self) -> bool {
        let mut state = self.lock();

        match state.lifecycle {
            Lifecycle::Ready => {
                warn!("Policy engine already initialized");
                return true;
            }
            Lifecycle::ShutDown => {
                error!("Policy engine is shut down and cannot be re-initialized");
                return false;
            }
            Lifecycle::Uninitialized => {}
        }

        info!("Initializing policy engine");

        let staged = match self.stage_starter_set(&state.policies) {
            Ok(staged) => staged,
            Err(e) => {
                error!(error = %e, "Failed to initialize policy engine");
                return false;
            }
        };

        state.policies.extend(staged);
        state.lifecycle = Lifecycle::Ready;
        if state.enforcement == EnforcementState::Lockdown {
            state.apply_lockdown();
        } else {
            state.enforcement = EnforcementState::Active;
        }

        info!(
            policies = state.policies.len(),
            enforcement = ?state.enforcement,
            "Policy engine initialized"
        );
        true
    }

    fn stage_starter_set(
        &self,
        existing: &BTreeMap<String, Policy>,
    ) -> Result<BTreeMap<String, Policy>, PolicyError> {
        self.config.validate()?;
        let mut staged = BTreeMap::new();
        for policy in &self.config.starter_policies {
            if existing.contains_key(&policy.id) {
                return Err(PolicyError::DuplicatePolicy(policy.id.clone()));
            }
            staged.insert(policy.id.clone(), policy.clone());
        }
        Ok(staged)
    }

    /// Gate a bare operation tag.
    pub fn can_execute_operation(&self, operation: &str) -> bool {
        self.can_execute(&OperationContext::new(operation))
    }

    /// Gate an operation described by `ctx`.
    ///
    /// With enforcement disabled every operation passes. Otherwise active
    /// policies are evaluated CRITICAL first (ties by id) and the first denial
    /// is logged, recorded as an `operation_denied` violation, and returned.
    pub fn can_execute(&self, ctx: &OperationContext) -> bool {
        let mut state = self.lock();

        if state.lifecycle != Lifecycle::Ready {
            warn!(
                operation = ctx.operation(),
                lifecycle = ?state.lifecycle,
                "Operation denied: policy engine not ready"
            );
            return false;
        }

        if state.enforcement == EnforcementState::Disabled {
            return true;
        }

        let mut active: Vec<&Policy> = state.policies.values().filter(|p| p.active).collect();
        active.sort_by_key(|p| p.level);

        let denial = active.into_iter().find_map(|policy| match policy.evaluate(ctx) {
            Verdict::Allow => None,
            Verdict::Deny { reason } => Some((
                policy.id.clone(),
                policy.name.clone(),
                policy.level,
                reason,
            )),
        });

        let Some((policy_id, policy_name, level, reason)) = denial else {
            debug!(operation = ctx.operation(), "Operation allowed");
            return true;
        };

        warn!(
            operation = ctx.operation(),
            policy_id = %policy_id,
            reason = %reason,
            "Operation denied by policy: {policy_name}"
        );
        state.violations.push(PolicyViolation::new(
            policy_id,
            "operation_denied",
            level,
            format!("operation '{}' denied: {reason}", ctx.operation()),
        ));
        false
    }

    /// Append a violation record. Remediation only happens when
    /// `lockdown_on_critical_violation` is configured.
    pub fn report_violation(
        &self,
        policy_id: &str,
        violation_type: &str,
        severity: PolicyLevel,
        description: &str,
    ) {
        let mut state = self.lock();

        if state.lifecycle == Lifecycle::ShutDown {
            error!(
                policy_id,
                violation_type, description, "Violation reported after shutdown was not recorded"
            );
            return;
        }

        match severity {
            PolicyLevel::Critical => {
                error!(policy_id, violation_type, "CRITICAL policy violation: {description}")
            }
            PolicyLevel::High | PolicyLevel::Medium => warn!(
                policy_id,
                violation_type,
                severity = %severity,
                "Policy violation: {description}"
            ),
            PolicyLevel::Low => {
                info!(policy_id, violation_type, "Low severity policy violation: {description}")
            }
        }

        state.violations.push(PolicyViolation::new(
            policy_id,
            violation_type,
            severity,
            description,
        ));

        if self.config.lockdown_on_critical_violation
            && severity == PolicyLevel::Critical
            && state.lifecycle == Lifecycle::Ready
            && state.enforcement != EnforcementState::Lockdown
        {
            error!(policy_id, "Critical violation escalated to emergency lockdown");
            let deactivated = state.apply_lockdown();
            info!(deactivated, "Lockdown complete - only critical policies active");
        }
    }

    /// Insert a new policy; `false` when the id is taken.
    pub fn add_policy(&self, policy: Policy) -> bool {
        match self.try_add_policy(policy) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Policy rejected");
                false
            }
        }
    }

    /// Fallible form of [`PolicyEngine::add_policy`].
    ///
    /// During lockdown a non-CRITICAL policy is stored inactive.
    pub fn try_add_policy(&self, mut policy: Policy) -> Result<(), PolicyError> {
        let mut state = self.lock();

        if state.lifecycle == Lifecycle::ShutDown {
            return Err(PolicyError::NotReady);
        }
        if policy.id.trim().is_empty() {
            return Err(PolicyError::EmptyPolicyId);
        }
        if state.policies.contains_key(&policy.id) {
            return Err(PolicyError::DuplicatePolicy(policy.id));
        }

        if state.enforcement == EnforcementState::Lockdown && !policy.is_critical() && policy.active
        {
            warn!(policy_id = %policy.id, "Lockdown active - non-critical policy stored inactive");
            policy.active = false;
        }

        info!(policy_id = %policy.id, level = %policy.level, "Added policy");
        state.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    /// Remove a policy. CRITICAL policies cannot be removed during lockdown.
    pub fn remove_policy(&self, policy_id: &str) -> bool {
        let mut state = self.lock();

        let locked = state.enforcement == EnforcementState::Lockdown;
        let critical = match state.policies.get(policy_id) {
            Some(p) => p.is_critical(),
            None => {
                debug!(policy_id, "No such policy to remove");
                return false;
            }
        };
        if locked && critical {
            warn!(policy_id, "Refusing to remove a critical policy during lockdown");
            return false;
        }

        state.policies.remove(policy_id);
        info!(policy_id, "Removed policy");
        true
    }

    /// Mark a policy active. Refused for non-CRITICAL policies during lockdown.
    pub fn activate_policy(&self, policy_id: &str) -> bool {
        let mut state = self.lock();

        let locked = state.enforcement == EnforcementState::Lockdown;
        let Some(policy) = state.policies.get_mut(policy_id) else {
            debug!(policy_id, "No such policy to activate");
            return false;
        };
        if locked && !policy.is_critical() {
            warn!(policy_id, "Lockdown active - only critical policies may be activated");
            return false;
        }
        policy.active = true;
        info!(policy_id, "Activated policy");
        true
    }

    /// Mark a policy inactive. Refused for CRITICAL policies during lockdown.
    pub fn deactivate_policy(&self, policy_id: &str) -> bool {
        let mut state = self.lock();

        let locked = state.enforcement == EnforcementState::Lockdown;
        let Some(policy) = state.policies.get_mut(policy_id) else {
            debug!(policy_id, "No such policy to deactivate");
            return false;
        };
        if locked && policy.is_critical() {
            warn!(policy_id, "Lockdown active - critical policies stay active");
            return false;
        }
        policy.active = false;
        info!(policy_id, "Deactivated policy");
        true
    }

    /// Deactivate every non-CRITICAL policy and force enforcement on.
    /// Irreversible for the lifetime of this engine.
    pub fn emergency_lockdown(&self) {
        let mut state = self.lock();

        if state.lifecycle == Lifecycle::ShutDown {
            error!("Emergency lockdown requested on a shut down policy engine");
            return;
        }

        error!("POLICY ENGINE EMERGENCY LOCKDOWN");
        let deactivated = state.apply_lockdown();
        info!(deactivated, "Lockdown complete - only critical policies active");
    }

    pub fn enable_enforcement(&self) -> bool {
        self.set_enforcement(EnforcementState::Active)
    }

    pub fn disable_enforcement(&self) -> bool {
        self.set_enforcement(EnforcementState::Disabled)
    }

    fn set_enforcement(&self, target: EnforcementState) -> bool {
        let mut state = self.lock();

        if state.lifecycle == Lifecycle::ShutDown {
            warn!(?target, "Enforcement change ignored: policy engine shut down");
            return false;
        }
        if state.enforcement == EnforcementState::Lockdown {
            warn!(?target, "Enforcement change refused during lockdown");
            return false;
        }

        state.enforcement = target;
        match target {
            EnforcementState::Disabled => warn!("Policy enforcement disabled"),
            _ => info!("Policy enforcement enabled"),
        }
        true
    }

    pub fn active_policy_count(&self) -> usize {
        self.lock().policies.values().filter(|p| p.active).count()
    }

    pub fn policy_count(&self) -> usize {
        self.lock().policies.len()
    }

    pub fn violation_count(&self) -> usize {
        self.lock().violations.len()
    }

    /// Active ids in ascending order.
    pub fn active_policy_ids(&self) -> Vec<String> {
        self.lock().active_ids()
    }

    /// True when policies are consulted (`Active` or `Lockdown`).
    pub fn is_enforcement_active(&self) -> bool {
        self.lock().enforcement != EnforcementState::Disabled
    }

    pub fn enforcement_state(&self) -> EnforcementState {
        self.lock().enforcement
    }

    pub fn is_locked_down(&self) -> bool {
        self.lock().enforcement == EnforcementState::Lockdown
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn policy(&self, policy_id: &str) -> Option<Policy> {
        self.lock().policies.get(policy_id).cloned()
    }

    pub fn violations(&self) -> Vec<PolicyViolation> {
        self.lock().violations.clone()
    }

    pub fn status(&self) -> PolicyStatus {
        let state = self.lock();
        PolicyStatus {
            lifecycle: state.lifecycle,
            enforcement: state.enforcement,
            policy_count: state.policies.len(),
            active_policy_ids: state.active_ids(),
            violation_count: state.violations.len(),
        }
    }

    /// Clear policies and violations and disable enforcement. Terminal.
    pub fn shutdown(&self) {
        let mut state = self.lock();

        info!("Shutting down policy engine");
        state.enforcement = EnforcementState::Disabled;
        state.policies.clear();
        state.violations.clear();
        state.lifecycle = Lifecycle::ShutDown;
        info!("Policy engine shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_order_is_critical_first() {
        let engine = PolicyEngine::default();
        assert!(engine.initialize());
        assert!(engine.add_policy(
            Policy::new("a_low", "A", "", PolicyLevel::Low).with_rule("deny_operations", "wipe")
        ));
        assert!(engine.add_policy(
            Policy::new("z_crit", "Z", "", PolicyLevel::Critical)
                .with_rule("deny_operations", "wipe")
        ));

        assert!(!engine.can_execute_operation("wipe"));
        let violations = engine.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].policy_id, "z_crit");
        assert_eq!(violations[0].severity, PolicyLevel::Critical);
    }

    #[test]
    fn lockdown_before_initialize_survives_initialize() {
        let engine = PolicyEngine::default();
        engine.emergency_lockdown();
        assert!(engine.initialize());
        assert_eq!(engine.enforcement_state(), EnforcementState::Lockdown);
        assert_eq!(
            engine.active_policy_ids(),
            vec![crate::config::SAFETY_POLICY_ID.to_string()]
        );
    }
}
