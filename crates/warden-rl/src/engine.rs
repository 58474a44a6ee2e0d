//! Decision engine - epsilon-greedy action choice and batched replay learning.
//!
//! All mutable state sits behind one per-instance lock held for the whole of
//! each public call. The only thing that reaches into a running `learn()` is
//! the lock-free [`AbortHandle`], polled before every sample.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    AbortHandle, Action, EngineConfig, Experience, ExperienceBuffer, NetworkSnapshot, QNetwork,
    Result, RlError, State,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    ShutDown,
}

/// What a `learn()` call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearnOutcome {
    /// Fewer experiences than one batch.
    Skipped,
    /// Learning is paused.
    Paused,
    /// A full batch was trained.
    Trained { loss: f64, synced: bool },
    /// The abort flag stopped the batch after `completed` samples.
    Aborted { completed: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineTelemetry {
    pub total_steps: u64,
    pub total_episodes: u64,
    pub average_reward: f64,
    pub exploration_rate: f64,
    pub buffer_len: usize,
    pub target_syncs: u64,
    pub learning_paused: bool,
}

struct Inner {
    lifecycle: Lifecycle,
    online: QNetwork,
    target: QNetwork,
    buffer: ExperienceBuffer,
    epsilon: f64,
    steps_since_sync: usize,
    total_steps: u64,
    total_episodes: u64,
    target_syncs: u64,
    last_episode_reward: Option<f64>,
    paused: bool,
    rng: StdRng,
}

impl Inner {
    fn ensure_ready(&self) -> Result<()> {
        if self.lifecycle == Lifecycle::Ready {
            Ok(())
        } else {
            Err(RlError::NotReady)
        }
    }
}

pub struct DecisionEngine {
    config: EngineConfig,
    abort: AbortHandle,
    inner: Mutex<Inner>,
}

fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            Some(_) => best = Some((i, v)),
            None => best = Some((i, v)),
        }
    }
    best
}

impl DecisionEngine {
    /// Engine whose generator is seeded from OS entropy.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Engine with a reproducible generator.
    pub fn with_seed(config: EngineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: EngineConfig, mut rng: StdRng) -> Self {
        let online = QNetwork::new(
            config.state_size,
            config.hidden_size,
            config.action_size,
            config.learning_rate,
            config.train_mode,
            &mut rng,
        );
        let target = online.clone();
        let inner = Inner {
            lifecycle: Lifecycle::Uninitialized,
            online,
            target,
            buffer: ExperienceBuffer::new(config.buffer_capacity),
            epsilon: config.initial_exploration_rate.clamp(0.0, 1.0),
            steps_since_sync: 0,
            total_steps: 0,
            total_episodes: 0,
            target_syncs: 0,
            last_episode_reward: None,
            paused: false,
            rng,
        };
        Self {
            config,
            abort: AbortHandle::new(),
            inner: Mutex::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate the configuration and reset buffer and counters.
    ///
    /// An invalid config leaves the engine not ready; every decision call then
    /// fails with [`RlError::NotReady`].
    pub fn initialize(&self) -> bool {
        let mut inner = self.lock();

        match inner.lifecycle {
            Lifecycle::Ready => {
                warn!("Decision engine already initialized");
                return true;
            }
            Lifecycle::ShutDown => {
                error!("Decision engine is shut down and cannot be re-initialized");
                return false;
            }
            Lifecycle::Uninitialized => {}
        }

        info!("Initializing decision engine");

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Failed to initialize decision engine");
            return false;
        }

        inner.buffer.clear();
        inner.total_steps = 0;
        inner.total_episodes = 0;
        inner.steps_since_sync = 0;
        inner.target_syncs = 0;
        inner.epsilon = self.config.initial_exploration_rate;
        inner.lifecycle = Lifecycle::Ready;

        info!(
            state_size = self.config.state_size,
            action_size = self.config.action_size,
            hidden_size = self.config.hidden_size,
            train_mode = ?self.config.train_mode,
            "Decision engine initialized"
        );
        true
    }

    /// Epsilon-greedy choice. Every accepted call counts as one step.
    pub fn get_action(&self, state: &State) -> Result<Action> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.ensure_ready()?;
        if state.features.len() != self.config.state_size {
            return Err(RlError::DimensionMismatch {
                expected: self.config.state_size,
                actual: state.features.len(),
            });
        }

        inner.total_steps += 1;

        if inner.rng.gen::<f64>() < inner.epsilon {
            let index = inner.rng.gen_range(0..self.config.action_size);
            debug!(index, "Exploring");
            return Ok(Action::discrete(index));
        }

        let q_values = inner.online.predict(&state.features)?;
        let (index, value) = argmax(&q_values).ok_or(RlError::DimensionMismatch {
            expected: self.config.action_size,
            actual: 0,
        })?;
        debug!(index, value, "Exploiting");

        let mut action = Action::discrete(index);
        action.expected_reward = value;
        Ok(action)
    }

    /// Online network's value estimates for `state`.
    pub fn q_values(&self, state: &State) -> Result<Vec<f64>> {
        let inner = self.lock();
        inner.ensure_ready()?;
        inner.online.predict(&state.features)
    }

    /// Record a transition after checking it fits the engine's layout.
    pub fn store_experience(
        &self,
        state: State,
        action: Action,
        reward: f64,
        next_state: State,
        done: bool,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_ready()?;

        for features in [&state.features, &next_state.features] {
            if features.len() != self.config.state_size {
                return Err(RlError::DimensionMismatch {
                    expected: self.config.state_size,
                    actual: features.len(),
                });
            }
        }
        match action.index() {
            Some(i) if i < self.config.action_size => {}
            _ => {
                return Err(RlError::InvalidAction {
                    action_id: action.id,
                    action_count: self.config.action_size,
                })
            }
        }

        inner
            .buffer
            .store(Experience::new(state, action, reward, next_state, done));
        Ok(())
    }

    /// Train the online network on one sampled batch.
    ///
    /// Samples `batch_size` indices with replacement. Each sample's label is
    /// the online prediction with the taken action's slot replaced by
    /// `reward + gamma * max target(next_state)` (just `reward` when done).
    /// Afterwards the sync counter advances and epsilon decays once.
    pub fn learn(&self) -> Result<LearnOutcome> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.ensure_ready()?;

        if inner.paused {
            return Ok(LearnOutcome::Paused);
        }
        if inner.buffer.len() < self.config.batch_size {
            return Ok(LearnOutcome::Skipped);
        }

        let indices = inner
            .buffer
            .sample_indices(&mut inner.rng, self.config.batch_size);

        let mut total_loss = 0.0;
        for (completed, idx) in indices.into_iter().enumerate() {
            if self.abort.is_abort_requested() {
                warn!(completed, "Training batch aborted");
                return Ok(LearnOutcome::Aborted { completed });
            }

            let Some(exp) = inner.buffer.get(idx) else {
                continue;
            };

            let mut label = inner.online.predict(&exp.state.features)?;
            let bootstrap = if exp.done {
                0.0
            } else {
                let next_q = inner.target.predict(&exp.next_state.features)?;
                argmax(&next_q).map_or(0.0, |(_, v)| v) * self.config.gamma
            };
            if let Some(slot) = exp.action.index().and_then(|a| label.get_mut(a)) {
                *slot = exp.reward + bootstrap;
            }

            total_loss += inner.online.train(&exp.state.features, &label)?;
        }

        inner.steps_since_sync += 1;
        let synced = inner.steps_since_sync >= self.config.update_frequency;
        if synced {
            inner.target.copy_weights_from(&inner.online)?;
            inner.steps_since_sync = 0;
            inner.target_syncs += 1;
            info!(syncs = inner.target_syncs, "Updated target network");
        }

        if inner.epsilon > self.config.epsilon_min {
            inner.epsilon = (inner.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        }

        let loss = total_loss / self.config.batch_size as f64;
        debug!(loss, epsilon = inner.epsilon, synced, "Learned from batch");
        Ok(LearnOutcome::Trained { loss, synced })
    }

    /// Returns the new episode number.
    pub fn start_episode(&self) -> u64 {
        let mut inner = self.lock();
        inner.total_episodes += 1;
        info!(episode = inner.total_episodes, "Starting episode");
        inner.total_episodes
    }

    pub fn end_episode(&self, total_reward: f64) {
        let mut inner = self.lock();
        inner.last_episode_reward = Some(total_reward);
        info!(
            episode = inner.total_episodes,
            total_reward, "Episode completed"
        );
    }

    /// Clamp into [0, 1]. NaN is treated as full exploration.
    pub fn set_exploration_rate(&self, rate: f64) {
        let mut inner = self.lock();
        inner.epsilon = if rate.is_nan() {
            1.0
        } else {
            rate.clamp(0.0, 1.0)
        };
        info!(epsilon = inner.epsilon, "Exploration rate set");
    }

    pub fn pause_learning(&self) {
        self.lock().paused = true;
        info!("Learning paused");
    }

    pub fn resume_learning(&self) {
        self.lock().paused = false;
        info!("Learning resumed");
    }

    /// Handle that can stop an in-flight `learn()` without the lock.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Drop every stored experience and return to full exploration.
    ///
    /// Raises the abort flag first so a running batch stops at its next
    /// sample; step and episode counters are kept.
    pub fn emergency_stop(&self) {
        self.abort.request_abort();
        let mut inner = self.lock();

        error!("EMERGENCY STOP: decision engine halted");
        inner.buffer.clear();
        inner.epsilon = 1.0;
        self.abort.clear();
        info!("Decision engine emergency stop complete");
    }

    /// Like [`DecisionEngine::emergency_stop`] but also zeroes step, episode,
    /// and sync counters. Network weights are kept.
    pub fn reset_learning(&self) {
        let mut inner = self.lock();

        info!("Resetting learning state");
        inner.buffer.clear();
        inner.total_steps = 0;
        inner.total_episodes = 0;
        inner.steps_since_sync = 0;
        inner.target_syncs = 0;
        inner.last_episode_reward = None;
        inner.epsilon = 1.0;
        info!("Learning state reset");
    }

    /// Release the buffer. Terminal.
    pub fn shutdown(&self) {
        let mut inner = self.lock();

        info!("Shutting down decision engine");
        inner.buffer.clear();
        inner.lifecycle = Lifecycle::ShutDown;
        info!("Decision engine shutdown complete");
    }

    pub fn is_ready(&self) -> bool {
        self.lock().lifecycle == Lifecycle::Ready
    }

    pub fn total_steps(&self) -> u64 {
        self.lock().total_steps
    }

    pub fn total_episodes(&self) -> u64 {
        self.lock().total_episodes
    }

    pub fn average_reward(&self) -> f64 {
        self.lock().buffer.average_reward()
    }

    pub fn exploration_rate(&self) -> f64 {
        self.lock().epsilon
    }

    pub fn buffer_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn target_syncs(&self) -> u64 {
        self.lock().target_syncs
    }

    pub fn is_learning_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn last_episode_reward(&self) -> Option<f64> {
        self.lock().last_episode_reward
    }

    /// Stored experiences, oldest first.
    pub fn experiences(&self) -> Vec<Experience> {
        self.lock().buffer.iter().cloned().collect()
    }

    pub fn telemetry(&self) -> EngineTelemetry {
        let inner = self.lock();
        EngineTelemetry {
            total_steps: inner.total_steps,
            total_episodes: inner.total_episodes,
            average_reward: inner.buffer.average_reward(),
            exploration_rate: inner.epsilon,
            buffer_len: inner.buffer.len(),
            target_syncs: inner.target_syncs,
            learning_paused: inner.paused,
        }
    }

    pub fn online_snapshot(&self) -> NetworkSnapshot {
        self.lock().online.snapshot()
    }

    pub fn target_snapshot(&self) -> NetworkSnapshot {
        self.lock().target.snapshot()
    }

    /// Load weights into both the online and the target network.
    pub fn restore_snapshot(&self, snapshot: &NetworkSnapshot) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.online.restore(snapshot)?;
        inner.target.copy_weights_from(&inner.online)?;
        inner.steps_since_sync = 0;
        info!("Restored network weights from snapshot");
        Ok(())
    }
}
