//! Fixed-capacity FIFO replay buffer.

use std::collections::VecDeque;

use rand::Rng;

use crate::Experience;

#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    capacity: usize,
    items: VecDeque<Experience>,
}

impl ExperienceBuffer {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append, evicting the single oldest entry first when full.
    pub fn store(&mut self, experience: Experience) -> Option<Experience> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(experience);
        evicted
    }

    pub fn get(&self, index: usize) -> Option<&Experience> {
        self.items.get(index)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Mean reward over stored experiences; zero when empty.
    pub fn average_reward(&self) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        self.items.iter().map(|e| e.reward).sum::<f64>() / self.items.len() as f64
    }

    /// `count` uniform indices drawn with replacement.
    pub fn sample_indices<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Vec<usize> {
        if self.items.is_empty() {
            return Vec::new();
        }
        (0..count)
            .map(|_| rng.gen_range(0..self.items.len()))
            .collect()
    }
}
