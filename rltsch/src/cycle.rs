//! Learning cycle: choose a slotframe size, observe it for one period, score it.
//!
//! This module handles:
//! - Action selection and the action to slotframe-size mapping
//! - Draining the packet log into the slot tracker
//! - Reward, value update, reconfiguration, reset and exploration decay

use log::info;

use crate::config::SchedulerConfig;
use crate::node::Node;
use crate::slots::{ReconfigReport, SlotChange};
use crate::time::Timestamp;
use crate::traits::{Clock, MacSchedule, Network, Random, Transport};
use crate::types::ActionId;

/// Where the node is in its cycle loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Not started; call [`Node::initialize`].
    Idle,
    /// Waiting for the link layer to come up on the initial schedule.
    WarmUp { until: Timestamp },
    /// A slotframe size is installed and being measured.
    Observing(CycleState),
}

/// The decision a running cycle is measuring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleState {
    pub action: ActionId,
    /// Greedy choice at decision time, for diagnostics.
    pub best_action: ActionId,
    pub slotframe_size: u16,
    pub buffer_before: usize,
    pub started: Timestamp,
    pub deadline: Timestamp,
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub action: ActionId,
    pub tx: u32,
    pub rx: u32,
    pub buffer_before: usize,
    pub buffer_after: usize,
    pub mean_retrans: f32,
    pub slot_reward: f32,
    pub bonus: f32,
    pub reward: f32,
    /// Present on cycles that ran a reconfiguration pass.
    pub reconfig: Option<ReconfigReport>,
}

/// Map `action` linearly onto `[min, max]`.
///
/// The action is clamped to `actions - 1`; a single-action table always maps to `min`.
pub fn slotframe_size_for(action: ActionId, actions: usize, min: u16, max: u16) -> u16 {
    if actions <= 1 || max <= min {
        return min;
    }
    let action = action.min(actions - 1) as u32;
    let span = (max - min) as u32;
    min + (action * span / (actions as u32 - 1)) as u16
}

impl<M, T, N, R, Clk, Cfg> Node<M, T, N, R, Clk, Cfg>
where
    M: MacSchedule,
    T: Transport,
    N: Network,
    R: Random,
    Clk: Clock,
    Cfg: SchedulerConfig,
{
    /// Slotframe size an action selects under the current bounds.
    pub fn slotframe_size_for(&self, action: ActionId) -> u16 {
        slotframe_size_for(
            action,
            self.learner().len(),
            self.tuning().min_slotframe,
            self.tuning().max_slotframe,
        )
    }

    /// Pick an action, install its slotframe and start observing.
    pub(crate) fn start_cycle(&mut self, now: Timestamp) {
        let epsilon = self.learner().epsilon();
        let (learner, random) = self.learner_and_random();
        let action = learner.select_action(epsilon, random);
        let best_action = self.learner().best_action();
        let size = self.slotframe_size_for(action);

        // Tracker first so the rebuild sees the slots the new frame exposes
        self.slots_mut().resize(size);
        let installed = self.rebuild_schedule(size);

        let buffer_before = self.transport().queue_length();
        let deadline = now + self.tuning().cycle_period;

        info!(
            "cycle start: action={} best={} epsilon={} slotframe={} links={} buffer={}",
            action, best_action, epsilon, size, installed, buffer_before
        );
        emit_debug!(
            self,
            crate::debug::DebugEvent::CycleStarted {
                timestamp: now,
                action,
                best_action,
                slotframe_size: size,
                epsilon,
            }
        );

        self.set_phase(Phase::Observing(CycleState {
            action,
            best_action,
            slotframe_size: size,
            buffer_before,
            started: now,
            deadline,
        }));
    }

    /// Score the finished cycle and feed the result back into the learner.
    pub(crate) fn finish_cycle(&mut self, now: Timestamp, state: CycleState) -> CycleReport {
        let buffer_after = self.transport().queue_length();
        let tx_records = self.transport_mut().drain_tx_records();
        let rx_records = self.transport_mut().drain_rx_records();
        let collisions = self.transport_mut().drain_collisions();

        let slots = self.slots_mut();
        for r in &tx_records {
            slots.record_tx(r.slot, r.peer, r.transmissions.saturating_sub(1));
        }
        for r in &rx_records {
            slots.record_rx(r.slot, r.peer);
        }
        for &slot in &collisions {
            slots.record_collision(slot);
        }

        let tx = tx_records.len() as u32;
        let rx = rx_records.len() as u32;
        let mean_retrans = if tx_records.is_empty() {
            0.0
        } else {
            let total: u32 = tx_records.iter().map(|r| r.transmissions as u32).sum();
            total as f32 / tx as f32
        };

        let slot_reward = self.slots_mut().analyze_performance();
        let bonus = self.slots().compute_efficiency_bonus();
        let reward = self.reward_model().reward(
            tx,
            rx,
            state.buffer_before,
            buffer_after,
            mean_retrans,
        ) + bonus;

        self.learner_mut().update(state.action, reward);

        // Must read the same statistics the reset below clears
        let reconfig = if self.slots().should_reconfigure() {
            let report = self.reconfigure_slots();
            self.metrics_mut().reconfigurations += 1;
            for change in &report.changes {
                self.trace_slot_change(*change);
            }
            Some(report)
        } else {
            None
        };

        self.slots_mut().reset_statistics();
        self.federated_mut().record_local_sample();
        let (decay, floor) = (self.tuning().epsilon_decay, self.tuning().epsilon_floor);
        self.learner_mut().decay(decay, floor);
        self.metrics_mut().cycles_completed += 1;

        info!(
            "cycle done at {}s: action={} tx={} rx={} buffer={}->{} retrans={} slot_reward={} bonus={} reward={} epsilon={}",
            now.as_secs(),
            state.action,
            tx,
            rx,
            state.buffer_before,
            buffer_after,
            mean_retrans,
            slot_reward,
            bonus,
            reward,
            self.learner().epsilon()
        );
        emit_debug!(
            self,
            crate::debug::DebugEvent::CycleCompleted {
                timestamp: now,
                action: state.action,
                tx,
                rx,
                slot_reward,
                bonus,
                reward,
            }
        );

        CycleReport {
            action: state.action,
            tx,
            rx,
            buffer_before: state.buffer_before,
            buffer_after,
            mean_retrans,
            slot_reward,
            bonus,
            reward,
            reconfig,
        }
    }

    #[allow(unused_variables)]
    fn trace_slot_change(&self, change: SlotChange) {
        emit_debug!(
            self,
            match change {
                SlotChange::Deactivated { slot, usage } => {
                    crate::debug::DebugEvent::SlotDeactivated { slot, usage }
                }
                SlotChange::Promoted { slot, peer } => {
                    crate::debug::DebugEvent::SlotPromoted { slot, peer }
                }
                SlotChange::Retuned { slot, from, to } => {
                    crate::debug::DebugEvent::ChannelRetuned { slot, from, to }
                }
            }
        );
    }
}
