#![forbid(unsafe_code)]
//! rltsch - Adaptive slotframe scheduling for TSCH networks
//!
//! Each node learns which slotframe length serves its traffic best, reshapes
//! individual slots from what it observes on them, and shares what it learned
//! with its neighbors.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. All tables are
//! heap-allocated once at construction with sizes fixed by a
//! [`SchedulerConfig`].
//!
//! # Key Properties
//!
//! - A tabular learner picks a slotframe size every cycle (epsilon-greedy)
//! - The reward combines throughput, buffer drain and retransmissions
//! - Per-slot statistics drive deactivation, dedicated links and channel hopping
//! - Neighbors exchange value tables and merge them (FedAvg, median, weighted)
//! - The link layer, network, clock and randomness are injected through traits
//!
//! # Example (basic usage)
//!
//! ```
//! use rltsch::{Node, DefaultConfig, Timestamp, Tuning};
//! use rltsch::traits::test_impls::{
//!     MockClock, MockNetwork, MockRandom, MockSchedule, MockTransport,
//! };
//!
//! let mut node = Node::<_, _, _, _, _, DefaultConfig>::new(
//!     7,
//!     MockSchedule::new(),
//!     MockTransport::new(),
//!     MockNetwork::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     Tuning::default(),
//! );
//!
//! // Installs the default 8-slot schedule and starts the warm-up
//! node.initialize(Timestamp::ZERO);
//! assert_eq!(node.schedule().size(), 8);
//!
//! // The first learning cycle starts when the warm-up ends
//! node.handle_timer(Timestamp::from_secs(120));
//! assert_eq!(node.metrics().cycles_completed, 0);
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use rltsch::{Node, MacSchedule, Transport, Network, Random, Clock, Tuning};
//!
//! // Implement traits for your platform...
//!
//! // Create a node
//! // let mut node = Node::new(node_id, mac, transport, network, random, clock, Tuning::default());
//!
//! // Spawn the node's run loop
//! // spawn(async move {
//! //     node.run().await;
//! // });
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types and protocol constants
//! - [`wire`] - Policy message serialization
//! - [`traits`] - MacSchedule, Transport, Network, Random, Clock traits
//! - [`node`] - Main Node struct and public API
//! - [`cycle`] - Learning cycle state machine
//! - [`sync`] - Policy sharing between neighbors
//! - [`reward`] - Cycle reward model
//! - [`learner`] - Value table and action selection
//! - [`slots`] - Per-slot statistics and reconfiguration
//! - [`schedule`] - Link bookkeeping on top of the schedule executor
//! - [`federated`] - Neighbor registry and aggregation
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Memory bounds and runtime tuning

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock link layers and a predictable random source."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod config;
#[macro_use]
pub mod debug;
pub mod cycle;
pub mod federated;
pub mod learner;
pub mod node;
pub mod reward;
pub mod schedule;
pub mod slots;
pub mod sync;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{DefaultConfig, SchedulerConfig, SmallConfig, Tuning};
pub use cycle::{CycleReport, CycleState, Phase};
pub use federated::{FederatedAggregator, FederatedStats, NeighborEntry};
pub use learner::QLearner;
pub use node::Node;
pub use reward::RewardModel;
pub use schedule::Schedule;
pub use slots::{ReconfigReport, SlotChange, SlotRecord, SlotStatsTracker, SlotSummary};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, MacSchedule, Network, Random, Transport};
pub use types::{
    ActionId, AggregationMethod, Datagram, Destination, LinkAddr, LinkHandle, LinkOptions,
    LinkSpec, LinkType, NodeId, NodeMetrics, PacketRecord, SlotConfig, SlotframeHandle,
};
pub use wire::{Decode, DecodeError, Encode, PolicyMessage};

// Re-export constants
pub use types::{
    ADVERTISING_SLOT, APP_PORT, DEFAULT_SLOTFRAME_SIZE, MAX_SAMPLE_COUNT, NUM_CHANNEL_OFFSETS,
    POLICY_PORT,
};

/// Float comparison for tests; `f32::abs` needs std.
#[cfg(test)]
pub(crate) fn approx_eq(a: f32, b: f32) -> bool {
    let diff = a - b;
    diff < 1e-4 && diff > -1e-4
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::traits::test_impls::{
        MockClock, MockNetwork, MockRandom, MockSchedule, MockTransport,
    };

    /// Type alias for test nodes using default config.
    type TestNode = Node<MockSchedule, MockTransport, MockNetwork, MockRandom, MockClock>;

    fn make_node(node_id: NodeId, seed: u64) -> TestNode {
        Node::new(
            node_id,
            MockSchedule::new(),
            MockTransport::new(),
            MockNetwork::new(),
            MockRandom::with_seed(seed),
            MockClock::new(),
            Tuning::default(),
        )
    }

    /// Deliver every datagram `from` sent to each node in `to`.
    fn exchange(from: &mut TestNode, to: &mut [&mut TestNode], now: Timestamp) {
        let id = from.node_id();
        for sent in from.network_mut().take_sent() {
            for node in to.iter_mut() {
                let deliver = match sent.destination {
                    Destination::Broadcast => true,
                    Destination::Node(dest) => dest == node.node_id(),
                };
                if deliver {
                    node.handle_network_rx(Datagram::new(id, sent.port, sent.data.clone()), now);
                }
            }
        }
    }

    #[test]
    fn test_node_creation() {
        let node = make_node(1, 1);
        assert_eq!(node.node_id(), 1);
        assert_eq!(node.phase(), Phase::Idle);
        assert_eq!(node.federated().neighbor_count(), 0);
        assert_eq!(node.slots().slotframe_size(), DEFAULT_SLOTFRAME_SIZE);
    }

    #[test]
    fn test_small_config_bounds() {
        let node: Node<_, _, _, _, _, SmallConfig> = Node::new(
            1,
            MockSchedule::new(),
            MockTransport::new(),
            MockNetwork::new(),
            MockRandom::new(),
            MockClock::new(),
            Tuning::default().with_slotframe_bounds(2, 200),
        );
        assert_eq!(
            node.tuning().max_slotframe as usize,
            SmallConfig::MAX_TRACKED_SLOTS
        );
        assert_eq!(node.slotframe_size_for(SmallConfig::TABLE_SIZE - 1), 32);
    }

    #[test]
    fn test_policy_roundtrip_between_nodes() {
        let mut a = make_node(1, 1);
        let mut b = make_node(2, 2);
        a.initialize(Timestamp::ZERO);
        b.initialize(Timestamp::ZERO);

        let now = Timestamp::from_secs(200);
        a.run_sync(now);
        exchange(&mut a, &mut [&mut b], now);

        let entry = b.federated().neighbor(1).unwrap();
        assert_eq!(entry.table.len(), a.learner().len());
        assert_eq!(b.metrics().policies_received, 1);
    }

    #[test]
    fn test_two_nodes_converge_under_fedavg() {
        let mut a = make_node(1, 11);
        let mut b = make_node(2, 22);
        a.initialize(Timestamp::ZERO);
        b.initialize(Timestamp::ZERO);

        let spread = |a: &TestNode, b: &TestNode| -> f32 {
            a.learner()
                .values()
                .iter()
                .zip(b.learner().values())
                .map(|(x, y)| if x > y { x - y } else { y - x })
                .fold(0.0, f32::max)
        };
        let before = spread(&a, &b);

        for round in 1..=10u64 {
            let now = Timestamp::from_secs(round * 10);
            a.broadcast_policy(now);
            b.broadcast_policy(now);
            exchange(&mut a, &mut [&mut b], now);
            exchange(&mut b, &mut [&mut a], now);
            a.aggregate_policies();
            b.aggregate_policies();
        }

        assert!(spread(&a, &b) < before / 100.0);
    }

    #[test]
    fn test_app_payload_reaches_sink() {
        let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
        let mut sink = make_node(1, 1);
        let mut sender: TestNode = Node::new(
            2,
            MockSchedule::new(),
            MockTransport::new(),
            MockNetwork::new(),
            MockRandom::new(),
            MockClock::new(),
            tuning,
        );
        sink.initialize(Timestamp::ZERO);
        sender.initialize(Timestamp::ZERO);

        let mut now = Timestamp::ZERO;
        while now < Timestamp::from_secs(600) {
            now = sender.next_wake().unwrap();
            sender.handle_timer(now);
            exchange(&mut sender, &mut [&mut sink], now);
        }

        // Sends at 180, 240, ... up to the last wake at or after 600
        assert!(sender.metrics().app_sent >= 7);
        assert_eq!(sink.metrics().app_received, sender.metrics().app_sent);
    }

    #[test]
    fn test_cycles_keep_schedule_and_tracker_in_step() {
        let mut node = make_node(3, 3);
        node.initialize(Timestamp::ZERO);

        let mut sizes = Vec::new();
        let mut now = Timestamp::ZERO;
        while node.metrics().cycles_completed < 12 {
            now = node.next_wake().unwrap();
            node.handle_timer(now);
            if let Phase::Observing(state) = node.phase() {
                assert_eq!(node.schedule().size(), state.slotframe_size);
                assert_eq!(node.slots().slotframe_size(), state.slotframe_size);
                sizes.push(state.slotframe_size);
            }
        }

        let tuning = node.tuning();
        assert!(sizes
            .iter()
            .all(|&s| s >= tuning.min_slotframe && s <= tuning.max_slotframe));
        assert!(node.learner().epsilon() >= tuning.epsilon_floor);
        assert!(node.metrics().reconfigurations >= 3);
    }
}
