//! Scheduler configuration.
//!
//! Two layers:
//! - [`SchedulerConfig`]: compile-time memory bounds, chosen per MCU class.
//! - [`Tuning`]: runtime learning, reward, slot and timing parameters.
//!
//! # Memory Footprint
//!
//! | Config | Slot records | Neighbor tables | Suitable MCUs |
//! |--------|-------------:|----------------:|---------------|
//! | `DefaultConfig` | 101 × ~32 B | 10 × (8 × 4 B + 16 B) | nRF52840, CC2538, STM32F4 |
//! | `SmallConfig` | 32 × ~32 B | 4 × (8 × 4 B + 16 B) | CC2650, STM32L0 |
//!
//! # Example
//!
//! ```ignore
//! use rltsch::{Node, DefaultConfig, Tuning};
//!
//! let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
//! let node = Node::<_, _, _, _, _, DefaultConfig>::new(7, schedule, transport, network, random, clock, tuning);
//! ```

use crate::time::Duration;
use crate::types::{AggregationMethod, NodeId};

/// Compile-time memory bounds. All bounds must be non-zero.
pub trait SchedulerConfig {
    /// Slot records kept by the statistics tracker; also the largest slotframe.
    const MAX_TRACKED_SLOTS: usize;

    /// Neighbor value tables held by the aggregator (K).
    const MAX_NEIGHBORS: usize;

    /// Actions in the value table (N).
    const TABLE_SIZE: usize;
}

/// Configuration for mid-range radios with 32KB+ RAM.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl SchedulerConfig for DefaultConfig {
    const MAX_TRACKED_SLOTS: usize = 101;
    const MAX_NEIGHBORS: usize = 10;
    const TABLE_SIZE: usize = 8;
}

/// Configuration for constrained radios.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl SchedulerConfig for SmallConfig {
    const MAX_TRACKED_SLOTS: usize = 32;
    const MAX_NEIGHBORS: usize = 4;
    const TABLE_SIZE: usize = 8;
}

/// Runtime parameters. `Default` carries the reference constants.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    // Learner
    pub alpha: f32,
    pub gamma: f32,
    pub initial_epsilon: f32,
    pub epsilon_decay: f32,
    pub epsilon_floor: f32,

    // Reward model
    pub throughput_weight: f32,
    pub buffer_weight: f32,
    pub retrans_weight: f32,
    pub buffer_penalty_cap: u16,
    pub conflict_penalty: f32,

    // Slot reconfiguration. The usage threshold is a raw per-cycle count.
    pub usage_threshold: u16,
    pub dedicated_threshold: u16,
    pub reconfig_interval: u32,

    // Slotframe bounds for the action mapping
    pub min_slotframe: u16,
    pub max_slotframe: u16,

    // Timing
    pub warmup: Duration,
    pub cycle_period: Duration,
    pub sync_period: Duration,
    pub sync_jitter: Duration,
    pub app_send_interval: Duration,

    // Federation
    pub aggregation: AggregationMethod,
    pub local_weight: f32,
    pub federation_enabled: bool,

    // Application traffic
    pub app_sink: Option<NodeId>,
    pub app_payload_len: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            gamma: 0.9,
            initial_epsilon: 0.3,
            epsilon_decay: 0.95,
            epsilon_floor: 0.05,

            throughput_weight: 3.0,
            buffer_weight: 0.5,
            retrans_weight: 2.0,
            buffer_penalty_cap: 20,
            conflict_penalty: 100.0,

            usage_threshold: 3,
            dedicated_threshold: 5,
            reconfig_interval: 3,

            min_slotframe: 2,
            max_slotframe: 16,

            warmup: Duration::from_secs(120),
            cycle_period: Duration::from_secs(120),
            sync_period: Duration::from_secs(180),
            sync_jitter: Duration::from_secs(10),
            app_send_interval: Duration::from_secs(60),

            aggregation: AggregationMethod::FedAvg,
            local_weight: 0.5,
            federation_enabled: true,

            app_sink: None,
            app_payload_len: 125,
        }
    }
}

impl Tuning {
    pub fn with_learning(mut self, alpha: f32, gamma: f32) -> Self {
        self.alpha = alpha;
        self.gamma = gamma;
        self
    }

    pub fn with_exploration(mut self, initial: f32, decay: f32, floor: f32) -> Self {
        self.initial_epsilon = initial;
        self.epsilon_decay = decay;
        self.epsilon_floor = floor;
        self
    }

    pub fn with_slotframe_bounds(mut self, min: u16, max: u16) -> Self {
        self.min_slotframe = min;
        self.max_slotframe = max;
        self
    }

    pub fn with_timing(mut self, warmup: Duration, cycle: Duration, sync: Duration) -> Self {
        self.warmup = warmup;
        self.cycle_period = cycle;
        self.sync_period = sync;
        self
    }

    pub fn with_sync_jitter(mut self, jitter: Duration) -> Self {
        self.sync_jitter = jitter;
        self
    }

    pub fn with_app_traffic(mut self, sink: Option<NodeId>, interval: Duration) -> Self {
        self.app_sink = sink;
        self.app_send_interval = interval;
        self
    }

    pub fn with_aggregation(mut self, method: AggregationMethod, local_weight: f32) -> Self {
        self.aggregation = method;
        self.local_weight = local_weight;
        self
    }

    pub fn with_federation(mut self, enabled: bool) -> Self {
        self.federation_enabled = enabled;
        self
    }

    pub fn with_reconfig_interval(mut self, interval: u32) -> Self {
        self.reconfig_interval = interval;
        self
    }

    /// Clamp every value into its legal range. Never fails.
    pub fn validated(mut self, max_tracked_slots: usize) -> Self {
        self.alpha = clamp_unit(self.alpha);
        self.gamma = clamp_unit(self.gamma);
        self.epsilon_floor = clamp_unit(self.epsilon_floor);
        self.initial_epsilon = clamp_unit(self.initial_epsilon).max(self.epsilon_floor);
        self.epsilon_decay = clamp_unit(self.epsilon_decay);
        self.local_weight = clamp_unit(self.local_weight);

        let cap = u16::try_from(max_tracked_slots).unwrap_or(u16::MAX).max(1);
        self.min_slotframe = self.min_slotframe.clamp(1, cap);
        self.max_slotframe = self.max_slotframe.clamp(self.min_slotframe, cap);

        self.reconfig_interval = self.reconfig_interval.max(1);
        self.cycle_period = self.cycle_period.at_least_one_ms();
        self.sync_period = self.sync_period.at_least_one_ms();
        self.app_send_interval = self.app_send_interval.at_least_one_ms();
        self
    }
}

/// NaN collapses to 0.
fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
