//! Tabular value learner over slotframe-size actions.
//!
//! One value per action, epsilon-greedy selection, and a one-step update that
//! bootstraps from the best action as it stood before the update.

use alloc::vec::Vec;

use crate::traits::Random;
use crate::types::ActionId;

/// Value table plus the exploration rate that drives it.
#[derive(Debug, Clone)]
pub struct QLearner {
    table: Vec<f32>,
    alpha: f32,
    gamma: f32,
    epsilon: f32,
}

impl QLearner {
    /// Create a learner with `size` actions, each initialized uniformly in [0, 1).
    ///
    /// A zero size is raised to one so `best_action` is always defined.
    pub fn new<R: Random>(size: usize, alpha: f32, gamma: f32, epsilon: f32, rng: &mut R) -> Self {
        let table = (0..size.max(1)).map(|_| rng.gen_unit()).collect();
        Self::from_table(table, alpha, gamma, epsilon)
    }

    /// Create a learner over an existing table.
    pub fn from_table(mut table: Vec<f32>, alpha: f32, gamma: f32, epsilon: f32) -> Self {
        if table.is_empty() {
            table.push(0.0);
        }
        Self {
            table,
            alpha,
            gamma,
            epsilon,
        }
    }

    /// Number of actions (N).
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.table
    }

    /// Mutable view for aggregation. The length cannot change through a slice.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.table
    }

    pub fn value(&self, action: ActionId) -> Option<f32> {
        self.table.get(action).copied()
    }

    /// Current exploration rate.
    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Epsilon-greedy: with probability `epsilon` a uniformly random action,
    /// otherwise the best one.
    pub fn select_action<R: Random>(&self, epsilon: f32, rng: &mut R) -> ActionId {
        if rng.gen_unit() < epsilon {
            rng.gen_range(0, self.table.len() as u64) as ActionId
        } else {
            self.best_action()
        }
    }

    /// Index of the largest value; ties go to the lowest index.
    pub fn best_action(&self) -> ActionId {
        let mut best = 0;
        for (i, &v) in self.table.iter().enumerate().skip(1) {
            if v > self.table[best] {
                best = i;
            }
        }
        best
    }

    /// One-step update. Out-of-range actions are ignored.
    pub fn update(&mut self, action: ActionId, reward: f32) {
        let best = self.best_action();
        let bootstrap = self.table[best];
        let (alpha, gamma) = (self.alpha, self.gamma);

        if let Some(v) = self.table.get_mut(action) {
            *v = (1.0 - alpha) * *v + alpha * (reward + gamma * bootstrap);
        }
    }

    /// `epsilon = max(floor, epsilon * rate)`.
    pub fn decay(&mut self, rate: f32, floor: f32) {
        self.epsilon = (self.epsilon * rate).max(floor);
    }

    /// Copy of the value table.
    pub fn snapshot(&self) -> Vec<f32> {
        self.table.clone()
    }
}
