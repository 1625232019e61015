//! Cycle reward model.
//!
//! A pure function of one cycle's observations. The buffer term is charged on
//! drain (`before > after`) and never on growth.

use crate::config::Tuning;

/// Weights and caps for the cycle reward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardModel {
    pub throughput_weight: f32,
    pub buffer_weight: f32,
    pub retrans_weight: f32,
    pub buffer_penalty_cap: u16,
    pub conflict_penalty: f32,
}

impl Default for RewardModel {
    fn default() -> Self {
        Self::from_tuning(&Tuning::default())
    }
}

impl RewardModel {
    pub fn from_tuning(tuning: &Tuning) -> Self {
        Self {
            throughput_weight: tuning.throughput_weight,
            buffer_weight: tuning.buffer_weight,
            retrans_weight: tuning.retrans_weight,
            buffer_penalty_cap: tuning.buffer_penalty_cap,
            conflict_penalty: tuning.conflict_penalty,
        }
    }

    /// Reward for one cycle.
    ///
    /// `mean_retrans` is the mean number of transmissions per sent packet; a value
    /// of 1.0 (every packet delivered first time) carries no penalty.
    pub fn reward(
        &self,
        tx: u32,
        rx: u32,
        buffer_before: usize,
        buffer_after: usize,
        mean_retrans: f32,
    ) -> f32 {
        let retrans_excess = (mean_retrans - 1.0).max(0.0);
        self.throughput(tx, rx)
            - self.buffer_penalty(buffer_before, buffer_after)
            - self.retrans_weight * retrans_excess
    }

    /// Legacy variant with a flat penalty per conflict instead of the
    /// retransmission term.
    pub fn reward_with_conflicts(
        &self,
        tx: u32,
        rx: u32,
        buffer_before: usize,
        buffer_after: usize,
        conflicts: u32,
    ) -> f32 {
        self.throughput(tx, rx)
            - self.buffer_penalty(buffer_before, buffer_after)
            - conflicts as f32 * self.conflict_penalty
    }

    fn throughput(&self, tx: u32, rx: u32) -> f32 {
        self.throughput_weight * tx.saturating_add(rx) as f32
    }

    fn buffer_penalty(&self, before: usize, after: usize) -> f32 {
        let drained = before
            .saturating_sub(after)
            .min(self.buffer_penalty_cap as usize);
        self.buffer_weight * drained as f32
    }
}
