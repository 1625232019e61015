//! Per-slot statistics and adaptive slot reconfiguration.
//!
//! The tracker keeps one [`SlotRecord`] per tracked timeslot. Counters are
//! per-cycle and cleared by [`SlotStatsTracker::reset_statistics`]; the
//! configuration, channel offset and primary neighbor persist across resets and
//! resizes.
//!
//! # Reconfiguration rules
//!
//! Applied to every linked slot except the advertising slot, first match wins:
//!
//! | Rule | Condition | Effect |
//! |------|-----------|--------|
//! | Deactivate | `usage < usage_threshold`, not Inactive | link removed, Inactive |
//! | Promote | `tx >= dedicated_threshold`, Shared, unicast primary neighbor | TX-only link to the neighbor |
//! | Re-tune | collision rate > 20% and > 5 collisions | channel offset rotated |
//!
//! The usage threshold is compared against the raw per-cycle usage count.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::config::Tuning;
use crate::schedule::Schedule;
use crate::traits::MacSchedule;
use crate::types::{
    LinkAddr, LinkOptions, LinkSpec, LinkType, SlotConfig, ADVERTISING_SLOT, NUM_CHANNEL_OFFSETS,
};

/// Collision rate (percent) above which a slot is re-tuned.
const RETUNE_COLLISION_RATE: f32 = 20.0;

/// Collisions a slot must exceed before it is re-tuned.
const RETUNE_MIN_COLLISIONS: u16 = 5;

/// Statistics and configuration of one timeslot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotRecord {
    pub successful_tx: u16,
    pub successful_rx: u16,
    pub collisions: u16,
    pub total_attempts: u16,
    pub retransmissions: u16,
    pub usage_count: u16,
    pub config: SlotConfig,
    pub channel_offset: u8,
    /// First peer seen in this slot; `LinkAddr::NULL` while unset.
    pub primary_neighbor: LinkAddr,
    /// Reward computed by the last `analyze_performance`.
    pub reward: f32,
}

impl SlotRecord {
    fn clear_counters(&mut self) {
        self.successful_tx = 0;
        self.successful_rx = 0;
        self.collisions = 0;
        self.total_attempts = 0;
        self.retransmissions = 0;
        self.usage_count = 0;
        self.reward = 0.0;
    }

    fn note_peer(&mut self, peer: LinkAddr) {
        if self.primary_neighbor.is_null() && !peer.is_null() {
            self.primary_neighbor = peer;
        }
    }

    /// Successful tx+rx as a percentage of all attempts.
    pub fn utilization(&self) -> f32 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        (self.successful_tx as f32 + self.successful_rx as f32) / self.total_attempts as f32 * 100.0
    }

    /// Collisions as a percentage of all attempts.
    pub fn collision_rate(&self) -> f32 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.collisions as f32 / self.total_attempts as f32 * 100.0
    }
}

/// Slot counts for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotSummary {
    pub slotframe_size: u16,
    pub active: u16,
    pub dedicated: u16,
    pub shared: u16,
    pub cycle: u32,
}

/// One change made by `reconfigure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChange {
    Deactivated { slot: u16, usage: u16 },
    Promoted { slot: u16, peer: LinkAddr },
    Retuned { slot: u16, from: u8, to: u8 },
}

/// What a `reconfigure` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconfigReport {
    pub changes: Vec<SlotChange>,
}

impl ReconfigReport {
    pub fn deactivated(&self) -> usize {
        self.count(|c| matches!(c, SlotChange::Deactivated { .. }))
    }

    pub fn promoted(&self) -> usize {
        self.count(|c| matches!(c, SlotChange::Promoted { .. }))
    }

    pub fn retuned(&self) -> usize {
        self.count(|c| matches!(c, SlotChange::Retuned { .. }))
    }

    fn count(&self, f: impl Fn(&SlotChange) -> bool) -> usize {
        self.changes.iter().filter(|c| f(c)).count()
    }
}

/// Per-slot statistics and reconfiguration engine.
#[derive(Debug, Clone)]
pub struct SlotStatsTracker {
    slots: Vec<SlotRecord>,
    slotframe_size: u16,
    active: u16,
    dedicated: u16,
    shared: u16,
    cycle: u32,

    usage_threshold: u16,
    dedicated_threshold: u16,
    reconfig_interval: u32,
}

impl SlotStatsTracker {
    /// Create a tracker for `max_tracked` slots with an initial slotframe.
    ///
    /// Slot 0 is the advertising slot; every other slot in the frame starts Shared.
    pub fn new(initial_size: u16, max_tracked: usize, tuning: &Tuning) -> Self {
        let max_tracked = max_tracked.clamp(1, u16::MAX as usize);
        let size = initial_size.clamp(1, max_tracked as u16);

        let mut slots = vec![SlotRecord::default(); max_tracked];
        slots[ADVERTISING_SLOT as usize].config = SlotConfig::Advertising;
        for slot in &mut slots[1..size as usize] {
            slot.config = SlotConfig::Shared;
        }

        info!("slot tracker initialized: size={}", size);

        Self {
            slots,
            slotframe_size: size,
            active: size,
            dedicated: 0,
            shared: size - 1,
            cycle: 0,
            usage_threshold: tuning.usage_threshold,
            dedicated_threshold: tuning.dedicated_threshold,
            reconfig_interval: tuning.reconfig_interval.max(1),
        }
    }

    pub fn slotframe_size(&self) -> u16 {
        self.slotframe_size
    }

    /// Largest slotframe the tracker can follow.
    pub fn max_tracked(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn active_slots(&self) -> u16 {
        self.active
    }

    pub fn dedicated_slots(&self) -> u16 {
        self.dedicated
    }

    pub fn shared_slots(&self) -> u16 {
        self.shared
    }

    /// Completed cycles (number of `reset_statistics` calls).
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Every tracked record, including slots beyond the current slotframe.
    pub fn records(&self) -> &[SlotRecord] {
        &self.slots
    }

    pub fn record(&self, slot: u16) -> Option<&SlotRecord> {
        self.slots.get(slot as usize)
    }

    /// Configuration of a slot; Inactive outside the current slotframe.
    pub fn config_of(&self, slot: u16) -> SlotConfig {
        if slot >= self.slotframe_size {
            return SlotConfig::Inactive;
        }
        self.slots[slot as usize].config
    }

    pub fn utilization(&self, slot: u16) -> f32 {
        self.record(slot).map_or(0.0, SlotRecord::utilization)
    }

    pub fn collision_rate(&self, slot: u16) -> f32 {
        self.record(slot).map_or(0.0, SlotRecord::collision_rate)
    }

    /// Next channel offset for a slot: round-robin over the 16 offsets.
    pub fn recommend_channel(&self, slot: u16) -> u8 {
        match self.record(slot) {
            Some(r) => (r.channel_offset.wrapping_add(1)) % NUM_CHANNEL_OFFSETS,
            None => 0,
        }
    }

    pub fn summary(&self) -> SlotSummary {
        SlotSummary {
            slotframe_size: self.slotframe_size,
            active: self.active,
            dedicated: self.dedicated,
            shared: self.shared,
            cycle: self.cycle,
        }
    }

    /// Record a delivered transmission. Out-of-range slots are ignored.
    pub fn record_tx(&mut self, slot: u16, peer: LinkAddr, retransmissions: u8) {
        if let Some(r) = self.slots.get_mut(slot as usize) {
            r.successful_tx = r.successful_tx.saturating_add(1);
            r.total_attempts = r.total_attempts.saturating_add(1);
            r.usage_count = r.usage_count.saturating_add(1);
            r.retransmissions = r.retransmissions.saturating_add(retransmissions as u16);
            r.note_peer(peer);
        }
    }

    /// Record a reception. Out-of-range slots are ignored.
    pub fn record_rx(&mut self, slot: u16, peer: LinkAddr) {
        if let Some(r) = self.slots.get_mut(slot as usize) {
            r.successful_rx = r.successful_rx.saturating_add(1);
            r.total_attempts = r.total_attempts.saturating_add(1);
            r.usage_count = r.usage_count.saturating_add(1);
            r.note_peer(peer);
        }
    }

    /// Record a collision. Out-of-range slots are ignored.
    pub fn record_collision(&mut self, slot: u16) {
        if let Some(r) = self.slots.get_mut(slot as usize) {
            r.collisions = r.collisions.saturating_add(1);
            r.total_attempts = r.total_attempts.saturating_add(1);
        }
    }

    /// Compute each slot's reward and return the mean over slots that were
    /// used this cycle or are configured (0 if none).
    pub fn analyze_performance(&mut self) -> f32 {
        let mut total = 0.0;
        let mut counted = 0u32;

        for r in self.frame_mut() {
            if r.usage_count > 0 || r.config != SlotConfig::Inactive {
                r.reward = (r.successful_tx as f32 + r.successful_rx as f32)
                    - 2.0 * r.collisions as f32
                    - 0.5 * r.retransmissions as f32;
                total += r.reward;
                counted += 1;
            }
        }

        if counted == 0 {
            0.0
        } else {
            total / counted as f32
        }
    }

    /// Auxiliary reward for schedule shape and overall collision rate.
    pub fn compute_efficiency_bonus(&self) -> f32 {
        let mut bonus = 2.0 * self.dedicated as f32;

        let inactive = self.slotframe_size.saturating_sub(self.active);
        if inactive > self.slotframe_size / 3 {
            bonus -= 0.5 * inactive as f32;
        }

        let (collisions, attempts) = self.frame().iter().fold((0u32, 0u32), |(c, a), r| {
            (c + r.collisions as u32, a + r.total_attempts as u32)
        });
        if attempts > 0 {
            let rate = collisions as f32 / attempts as f32;
            if rate < 0.1 {
                bonus += 5.0;
            } else if rate > 0.3 {
                bonus -= 5.0;
            }
        }

        bonus
    }

    /// Apply the reconfiguration rules to every linked slot.
    ///
    /// A schedule without an installed slotframe makes this a no-op.
    pub fn reconfigure<M: MacSchedule>(&mut self, schedule: &mut Schedule<M>) -> ReconfigReport {
        let mut report = ReconfigReport::default();

        if !schedule.is_installed() {
            warn!("cannot reconfigure: no slotframe installed");
            return report;
        }

        let size = self.slotframe_size.min(schedule.size());
        for slot in (ADVERTISING_SLOT + 1)..size {
            if !schedule.has_link(slot) {
                continue;
            }
            if let Some(change) = self.reconfigure_slot(slot, schedule) {
                report.changes.push(change);
            }
        }

        info!(
            "reconfiguration: deactivated={} dedicated={} retuned={}",
            report.deactivated(),
            report.promoted(),
            report.retuned()
        );
        info!(
            "active slots: {} (dedicated={}, shared={})",
            self.active, self.dedicated, self.shared
        );
        report
    }

    fn reconfigure_slot<M: MacSchedule>(
        &mut self,
        slot: u16,
        schedule: &mut Schedule<M>,
    ) -> Option<SlotChange> {
        let r = self.slots[slot as usize];

        if r.usage_count < self.usage_threshold && r.config != SlotConfig::Inactive {
            debug!(
                "slot {}: deactivating (usage={}, util={}%)",
                slot,
                r.usage_count,
                r.utilization()
            );
            schedule.remove_link(slot);
            self.set_config(slot, SlotConfig::Inactive);
            return Some(SlotChange::Deactivated {
                slot,
                usage: r.usage_count,
            });
        }

        if r.successful_tx >= self.dedicated_threshold
            && r.config == SlotConfig::Shared
            && r.primary_neighbor.is_unicast()
        {
            debug!(
                "slot {}: promoting to dedicated tx (tx={}, neighbor={:?})",
                slot, r.successful_tx, r.primary_neighbor
            );
            let link = LinkSpec {
                options: LinkOptions::TX_ONLY,
                link_type: LinkType::Normal,
                address: r.primary_neighbor,
                timeslot: slot,
                channel_offset: r.channel_offset,
            };
            if !schedule.replace_link(slot, link) {
                warn!("slot {}: dedicated link refused", slot);
            }
            self.set_config(slot, SlotConfig::DedicatedTx);
            return Some(SlotChange::Promoted {
                slot,
                peer: r.primary_neighbor,
            });
        }

        if r.collision_rate() > RETUNE_COLLISION_RATE && r.collisions > RETUNE_MIN_COLLISIONS {
            let to = self.recommend_channel(slot);
            if to == r.channel_offset {
                return None;
            }
            let current = *schedule.link(slot)?;
            debug!(
                "slot {}: channel offset {} -> {} (collisions={}, rate={}%)",
                slot,
                r.channel_offset,
                to,
                r.collisions,
                r.collision_rate()
            );
            if !schedule.replace_link(
                slot,
                LinkSpec {
                    channel_offset: to,
                    ..current
                },
            ) {
                warn!("slot {}: re-tuned link refused", slot);
            }
            self.slots[slot as usize].channel_offset = to;
            return Some(SlotChange::Retuned {
                slot,
                from: r.channel_offset,
                to,
            });
        }

        None
    }

    /// Zero every per-cycle counter in the slotframe and advance the cycle count.
    pub fn reset_statistics(&mut self) {
        for r in self.frame_mut() {
            r.clear_counters();
        }
        self.cycle = self.cycle.saturating_add(1);
        debug!("slot statistics reset for cycle {}", self.cycle);
    }

    /// Follow a slotframe size change, clamped to `[1, max_tracked]`.
    ///
    /// Growing re-initializes the exposed slots as Shared with zeroed statistics.
    /// Shrinking marks the cut slots Inactive but keeps their statistics. Slots
    /// in the unchanged range are never touched.
    pub fn resize(&mut self, new_size: u16) {
        let new_size = new_size.clamp(1, self.max_tracked());
        let old_size = self.slotframe_size;
        if new_size == old_size {
            return;
        }

        info!("slotframe size {} -> {}", old_size, new_size);

        if new_size > old_size {
            for r in &mut self.slots[old_size as usize..new_size as usize] {
                *r = SlotRecord {
                    config: SlotConfig::Shared,
                    ..SlotRecord::default()
                };
            }
            let grown = new_size - old_size;
            self.active += grown;
            self.shared += grown;
        } else {
            for slot in new_size..old_size {
                self.set_config(slot, SlotConfig::Inactive);
            }
        }

        self.slotframe_size = new_size;
    }

    /// True on every positive multiple of the reconfiguration interval.
    pub fn should_reconfigure(&self) -> bool {
        self.cycle > 0 && self.cycle % self.reconfig_interval == 0
    }

    /// Change a slot's configuration, keeping the counters consistent.
    fn set_config(&mut self, slot: u16, config: SlotConfig) {
        let old = self.slots[slot as usize].config;
        if old == config {
            return;
        }
        self.adjust_counts(old, false);
        self.adjust_counts(config, true);
        self.slots[slot as usize].config = config;
    }

    fn adjust_counts(&mut self, config: SlotConfig, add: bool) {
        let bump = |n: &mut u16| {
            *n = if add {
                n.saturating_add(1)
            } else {
                n.saturating_sub(1)
            }
        };
        match config {
            SlotConfig::Inactive => {}
            SlotConfig::Advertising => bump(&mut self.active),
            SlotConfig::Shared => {
                bump(&mut self.active);
                bump(&mut self.shared);
            }
            SlotConfig::DedicatedTx | SlotConfig::DedicatedRx => {
                bump(&mut self.active);
                bump(&mut self.dedicated);
            }
        }
    }

    fn frame(&self) -> &[SlotRecord] {
        &self.slots[..self.slotframe_size as usize]
    }

    fn frame_mut(&mut self) -> &mut [SlotRecord] {
        &mut self.slots[..self.slotframe_size as usize]
    }
}
