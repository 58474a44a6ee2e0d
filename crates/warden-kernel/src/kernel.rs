//! Kernel - the perceive, gate, act, observe, store, learn cycle.
//!
//! The kernel owns one [`PolicyEngine`] and one [`DecisionEngine`]. The two
//! engines never call each other; the kernel checks the gate before every
//! action and turns cycle faults into HIGH violations against
//! `fault_policy_id`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use warden_policy::{OperationContext, PolicyEngine, PolicyLevel, PolicyStatus};
use warden_rl::{Action, DecisionEngine, EngineTelemetry, LearnOutcome, SensorLayout};

use crate::config::KernelConfig;
use crate::environment::{Environment, Readings};

/// Violation type recorded for a failed cycle.
pub const CYCLE_ERROR: &str = "cycle_error";

/// Longest single sleep while backing off, so a stop request is seen quickly.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Result of one decision cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The gate denied the operation; nothing was chosen or stored.
    Blocked,
    Completed {
        action: Action,
        reward: f64,
        done: bool,
        learned: LearnOutcome,
    },
}

/// Counters for one `run` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub completed: u64,
    pub blocked: u64,
    pub faults: u64,
    /// Episodes ended during the run, including the one closed at exit.
    pub episodes: u64,
    pub total_reward: f64,
    /// The loop ended on a stop request rather than the cycle limit.
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub decisions: EngineTelemetry,
    pub last_episode_reward: Option<f64>,
    pub policies: PolicyStatus,
    pub locked_down: bool,
}

pub struct Kernel {
    config: KernelConfig,
    layout: SensorLayout,
    policy: PolicyEngine,
    decisions: DecisionEngine,
    halted: AtomicBool,
}

impl Kernel {
    /// Kernel whose decision engine draws from OS entropy.
    pub fn new(config: KernelConfig) -> Result<Self> {
        let decisions = DecisionEngine::new(config.engine.clone());
        Self::assemble(config, decisions)
    }

    /// Kernel with a reproducible decision engine.
    pub fn with_seed(config: KernelConfig, seed: u64) -> Result<Self> {
        let decisions = DecisionEngine::with_seed(config.engine.clone(), seed);
        Self::assemble(config, decisions)
    }

    fn assemble(config: KernelConfig, decisions: DecisionEngine) -> Result<Self> {
        config.validate().context("Invalid kernel config")?;
        let layout = SensorLayout::new(config.sensors.iter().cloned())
            .context("Invalid sensor layout")?;
        let policy = PolicyEngine::new(config.policy.clone());
        Ok(Self {
            config,
            layout,
            policy,
            decisions,
            halted: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn decision_engine(&self) -> &DecisionEngine {
        &self.decisions
    }

    pub fn layout(&self) -> &SensorLayout {
        &self.layout
    }

    /// Bring up the policy engine first, then the decision engine.
    pub fn initialize(&self) -> bool {
        info!("Initializing kernel");

        if !self.policy.initialize() {
            error!("Failed to initialize policy engine");
            return false;
        }
        if !self.decisions.initialize() {
            error!("Failed to initialize decision engine");
            return false;
        }

        info!(
            sensors = self.layout.len(),
            gate_operation = %self.config.gate_operation,
            "Kernel initialized"
        );
        true
    }

    fn gate_context(&self, readings: &Readings) -> OperationContext {
        readings.iter().fold(
            OperationContext::new(self.config.gate_operation.as_str()),
            |ctx, (name, value)| ctx.with_metric(name.as_str(), *value),
        )
    }

    /// One pass through the cycle for an already sensed snapshot.
    ///
    /// The gate sees the readings as metrics, so threshold rules such as
    /// `max_cpu_usage` apply. Every fault after the gate propagates.
    pub fn run_cycle<E: Environment + ?Sized>(
        &self,
        readings: &Readings,
        env: &mut E,
    ) -> Result<CycleOutcome> {
        let state = self
            .layout
            .build_state(readings)
            .context("Failed to build state from sensor readings")?;

        if !self.policy.can_execute(&self.gate_context(readings)) {
            warn!(
                operation = %self.config.gate_operation,
                "Decision cycle blocked by policy"
            );
            return Ok(CycleOutcome::Blocked);
        }

        let action = self
            .decisions
            .get_action(&state)
            .context("Failed to choose action")?;

        let feedback = env
            .execute(&action, readings)
            .with_context(|| format!("Failed to execute {}", action.id))?;

        let mut next_state = match &feedback.next_readings {
            Some(next) => self
                .layout
                .build_state(next)
                .context("Failed to build next state")?,
            None => state.clone(),
        };
        next_state.reward = feedback.reward;
        next_state.terminal = feedback.done;

        self.decisions
            .store_experience(
                state,
                action.clone(),
                feedback.reward,
                next_state,
                feedback.done,
            )
            .context("Failed to store experience")?;

        let learned = self.decisions.learn().context("Failed to learn")?;
        debug!(action = %action.id, reward = feedback.reward, ?learned, "Cycle completed");

        Ok(CycleOutcome::Completed {
            action,
            reward: feedback.reward,
            done: feedback.done,
            learned,
        })
    }

    fn sense_and_cycle<E: Environment + ?Sized>(&self, env: &mut E) -> Result<CycleOutcome> {
        let readings = env.sense().context("Failed to read sensors")?;
        self.run_cycle(&readings, env)
    }

    fn record_fault(&self, cycle: u64, fault: &anyhow::Error) {
        let description = format!("cycle {cycle}: {fault:#}");
        error!(cycle, error = %description, "Error in decision cycle");
        self.policy.report_violation(
            &self.config.fault_policy_id,
            CYCLE_ERROR,
            PolicyLevel::High,
            &description,
        );
    }

    /// Sleep up to `ms`, returning early once a stop is requested.
    fn pause(&self, ms: u64, stop: &AtomicBool) {
        let mut remaining = Duration::from_millis(ms);
        while !remaining.is_zero() && !self.should_stop(stop) {
            let slice = remaining.min(PAUSE_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    fn should_stop(&self, stop: &AtomicBool) -> bool {
        stop.load(Ordering::Acquire) || self.halted.load(Ordering::Acquire)
    }

    /// Run cycles until `max_cycles` is reached or a stop is requested.
    ///
    /// Faults never end the loop: each is logged, reported, and followed by
    /// `fault_backoff_ms` before the next cycle. An episode is open for the
    /// whole run and restarted whenever the environment reports `done`.
    pub fn run<E: Environment + ?Sized>(
        &self,
        max_cycles: Option<u64>,
        env: &mut E,
        stop: &AtomicBool,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut episode_reward = 0.0;

        if self.should_stop(stop) {
            info!("Stop already requested, not starting the loop");
            summary.stopped = true;
            return summary;
        }

        info!(?max_cycles, "Starting decision cycle loop");
        self.decisions.start_episode();

        while max_cycles.map_or(true, |max| summary.cycles < max) {
            if self.should_stop(stop) {
                info!(cycles = summary.cycles, "Stop requested");
                summary.stopped = true;
                break;
            }

            summary.cycles += 1;
            let cycle = summary.cycles;

            match self.sense_and_cycle(env) {
                Ok(CycleOutcome::Completed { reward, done, .. }) => {
                    summary.completed += 1;
                    summary.total_reward += reward;
                    episode_reward += reward;
                    if done {
                        self.decisions.end_episode(episode_reward);
                        summary.episodes += 1;
                        episode_reward = 0.0;
                        self.decisions.start_episode();
                    }
                    self.pause(self.config.cycle_interval_ms, stop);
                }
                Ok(CycleOutcome::Blocked) => {
                    summary.blocked += 1;
                    self.pause(self.config.fault_backoff_ms, stop);
                }
                Err(fault) => {
                    summary.faults += 1;
                    self.record_fault(cycle, &fault);
                    self.pause(self.config.fault_backoff_ms, stop);
                }
            }

            if self.config.report_every > 0 && cycle % self.config.report_every == 0 {
                info!(
                    cycle,
                    average_reward = self.decisions.average_reward(),
                    exploration_rate = self.decisions.exploration_rate(),
                    "Cycle progress"
                );
            }
        }

        self.decisions.end_episode(episode_reward);
        summary.episodes += 1;

        info!(
            cycles = summary.cycles,
            completed = summary.completed,
            blocked = summary.blocked,
            faults = summary.faults,
            "Decision cycle loop finished"
        );
        summary
    }

    pub fn start_episode(&self) -> u64 {
        self.decisions.start_episode()
    }

    pub fn end_episode(&self, total_reward: f64) {
        self.decisions.end_episode(total_reward);
    }

    /// Halt learning and lock the gate down to CRITICAL policies.
    ///
    /// Latches the kernel: any running or later `run` returns at its next
    /// check.
    pub fn emergency_stop(&self) {
        error!("KERNEL EMERGENCY STOP");
        self.halted.store(true, Ordering::Release);
        self.decisions.emergency_stop();
        self.policy.emergency_lockdown();
        info!("Kernel emergency stop complete");
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Terminal for both engines.
    pub fn shutdown(&self) {
        info!("Shutting down kernel");
        self.halted.store(true, Ordering::Release);
        self.decisions.shutdown();
        self.policy.shutdown();
        info!("Kernel shutdown complete");
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            decisions: self.decisions.telemetry(),
            last_episode_reward: self.decisions.last_episode_reward(),
            policies: self.policy.status(),
            locked_down: self.policy.is_locked_down(),
        }
    }
}
