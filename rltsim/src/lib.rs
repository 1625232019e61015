//! rltsim - Discrete event simulator for rltsch adaptive scheduling nodes.
//!
//! This crate provides a deterministic, discrete-event simulator for running many
//! rltsch nodes in one process without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **In-memory link layer**: Schedule executor, packet queue and packet logs per node
//! - **Radio model**: Per-link loss, delay and same-timeslot contention
//! - **Configurable topology**: Fully connected, chain, star, or custom topologies
//! - **Scenario builder**: Tuning overrides, app traffic, partitions, aggregation switches
//! - **Metrics collection**: Value table snapshots, spread across nodes, message counts
//!
//! # Example
//!
//! ```
//! use rltsim::{ScenarioBuilder, Duration};
//!
//! // Three nodes in range of each other, past the first sync round
//! let result = ScenarioBuilder::new(3)
//!     .with_seed(42)
//!     .run_for(Duration::from_secs(400));
//!
//! // Every node has stored a neighbor's policy
//! assert!(result.all_have_neighbor());
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call node handlers)
//! 4. Route broadcasts through the topology, queue unicasts at the link layer
//! 5. Push queued packets over the air and schedule their deliveries
//! 6. Re-arm the node's timer at its next deadline
//!
//! Handlers are called directly (`handle_timer`, `handle_network_rx`) instead of
//! through the async `node.run()` method.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{PolicySnapshot, SimMetrics, SimulationResult};
pub use node::SimNode;
pub use rltsch::{AggregationMethod, Duration, NodeId, Timestamp, Tuning};
pub use scenario::{collection_scenario, simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{Link, Topology};

#[cfg(test)]
mod tests {
    use rltsch::debug::DebugEvent;

    use super::*;

    /// Learning never starts within the run; only policy sharing moves tables.
    fn sharing_only() -> Tuning {
        Tuning::default().with_timing(
            Duration::from_secs(36_000),
            Duration::from_secs(120),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_single_node_learns_alone() {
        let (mut sim, nodes) = ScenarioBuilder::new(1).with_seed(42).build();
        let result = sim.run_for(Duration::from_secs(600));

        let node = sim.node(nodes[0]).unwrap();
        assert_eq!(node.inner().metrics().cycles_completed, 4);
        assert_eq!(node.neighbor_count(), 0);
        assert!(!result.all_have_neighbor());

        let completed = node
            .take_debug_events()
            .into_iter()
            .filter(|e| matches!(e, DebugEvent::CycleCompleted { .. }))
            .count();
        assert_eq!(completed, 4);

        // Exploration decays once per cycle
        let snapshot = result.metrics.latest_snapshot().unwrap();
        let expected = 0.3 * 0.95f32.powi(4);
        assert!((snapshot.epsilons[&nodes[0]] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_neighbors_discovered_after_first_sync() {
        let result = simple_scenario(4)
            .with_seed(7)
            .with_snapshot_interval(Duration::from_secs(30))
            .run_for(Duration::from_secs(400));

        assert!(result.all_have_neighbor());
        let discovered = result.metrics.neighbor_discovery_time().unwrap();
        // First sync rounds land within [180 s, 190 s]
        assert!(discovered >= Timestamp::from_secs(180));
        assert!(discovered <= Timestamp::from_secs(400));

        let last = result.metrics.latest_snapshot().unwrap();
        assert!(last.neighbor_counts.values().all(|&n| n == 3));
    }

    #[test]
    fn test_fedavg_pulls_tables_together() {
        let result = ScenarioBuilder::new(5)
            .with_seed(11)
            .with_tuning(sharing_only())
            .run_for(Duration::from_secs(1200));

        let initial = result.metrics.first_snapshot().unwrap().table_spread();
        assert!(initial > 0.0);
        assert!(
            result.final_spread() < initial * 0.1,
            "spread {} -> {}",
            initial,
            result.final_spread()
        );
    }

    #[test]
    fn test_disabled_federation_leaves_tables_apart() {
        let result = ScenarioBuilder::new(5)
            .with_seed(11)
            .with_tuning(sharing_only().with_federation(false))
            .run_for(Duration::from_secs(1200));

        let first = result.metrics.first_snapshot().unwrap();
        let last = result.metrics.latest_snapshot().unwrap();
        assert_eq!(first.tables, last.tables);
        // Policies are still exchanged, just never merged
        assert!(last.all_have_neighbor());
    }

    #[test]
    fn test_partition_limits_registry_then_heal_restores() {
        let (mut sim, nodes) = ScenarioBuilder::new(4)
            .with_seed(3)
            .partition_at(Timestamp::from_secs(10), vec![vec![0, 1], vec![2, 3]])
            .heal_at(Timestamp::from_secs(1200))
            .build();

        sim.run_until(Timestamp::from_secs(1190));
        for &id in &nodes {
            assert_eq!(sim.node(id).unwrap().neighbor_count(), 1);
        }

        sim.run_until(Timestamp::from_secs(1600));
        for &id in &nodes {
            assert_eq!(sim.node(id).unwrap().neighbor_count(), 3);
        }
    }

    #[test]
    fn test_collection_traffic_reaches_hub() {
        let (mut sim, nodes) = collection_scenario(4).with_seed(5).build();
        let result = sim.run_for(Duration::from_secs(1800));

        // No contention in a star: every spoke packet leaves on its first attempt
        assert_eq!(result.metrics.collisions, 0);
        assert_eq!(result.metrics.app_enqueued, 3 * 28);
        assert_eq!(result.metrics.app_transmitted, result.metrics.app_enqueued);

        let hub = sim.node(nodes[0]).unwrap().inner();
        assert!(hub.metrics().app_received > 0);
        assert_eq!(hub.metrics().app_received as u64, result.metrics.app_delivered);

        for &id in &nodes {
            let node = sim.node(id).unwrap().inner();
            assert_eq!(node.metrics().cycles_completed, 14);
            assert!(node.metrics().reconfigurations >= 1);
        }
    }

    #[test]
    fn test_slotframe_sizes_stay_in_bounds() {
        let result = collection_scenario(5)
            .with_seed(9)
            .with_snapshot_interval(Duration::from_secs(120))
            .run_for(Duration::from_secs(2400));

        let tuning = Tuning::default();
        for snapshot in &result.metrics.snapshots {
            for &size in snapshot.slotframe_sizes.values() {
                assert!(size >= tuning.min_slotframe && size <= tuning.max_slotframe);
            }
            assert!(snapshot.mean_epsilon() >= tuning.epsilon_floor);
        }
    }

    #[test]
    fn test_runs_are_deterministic() {
        let run = || {
            collection_scenario(4)
                .with_seed(21)
                .with_loss_rate(0.1)
                .run_for(Duration::from_secs(900))
        };
        let a = run();
        let b = run();

        assert_eq!(a.metrics.latest_snapshot(), b.metrics.latest_snapshot());
        assert_eq!(a.metrics.app_delivered, b.metrics.app_delivered);
        assert_eq!(a.metrics.messages_dropped, b.metrics.messages_dropped);
    }
}
