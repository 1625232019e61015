//! Scenario builder for setting up and running simulations.

use rltsch::{AggregationMethod, Duration, NodeId, Timestamp, Tuning};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::Topology;

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    Chain,
    /// First node is the hub.
    Star,
    Custom(Topology),
}

/// Builder for simulation scenarios.
///
/// Nodes get ids `1..=num_nodes`; methods taking node indices refer to
/// position in that list (index 0 is node 1).
pub struct ScenarioBuilder {
    num_nodes: usize,
    seed: u64,
    topology_type: TopologyType,
    loss_rate: f64,
    delay: Duration,
    tuning: Tuning,
    /// Index of the node every other node sends application traffic to.
    app_sink: Option<usize>,
    actions: Vec<(Timestamp, ScenarioAction)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a fully connected scenario with the specified number of nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: TopologyType::FullyConnected,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            tuning: Tuning::default(),
            app_sink: None,
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    /// Id of the node at `index`.
    pub fn node_id(index: usize) -> NodeId {
        index as NodeId + 1
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set a custom network topology over ids `1..=num_nodes`.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = TopologyType::Custom(topo);
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = TopologyType::FullyConnected;
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = TopologyType::Chain;
        self
    }

    pub fn star_topology(mut self) -> Self {
        self.topology_type = TopologyType::Star;
        self
    }

    /// Set the loss rate of every link.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Tuning shared by every node. Any app sink set here is replaced by
    /// [`with_app_sink`](Self::with_app_sink).
    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Every other node sends application payloads to the node at `index`
    /// every `interval`.
    pub fn with_app_sink(mut self, index: usize, interval: Duration) -> Self {
        self.app_sink = Some(index);
        self.tuning.app_send_interval = interval;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Schedule a network partition; `groups` hold node indices.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(Self::node_id).collect())
            .collect();
        self.actions
            .push((time, ScenarioAction::Partition { groups }));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    /// Switch every node's aggregation method at `time`.
    pub fn aggregation_at(
        mut self,
        time: Timestamp,
        method: AggregationMethod,
        local_weight: f32,
    ) -> Self {
        self.actions.push((
            time,
            ScenarioAction::SetAggregation {
                method,
                local_weight,
            },
        ));
        self
    }

    pub fn federation_at(mut self, time: Timestamp, enabled: bool) -> Self {
        self.actions
            .push((time, ScenarioAction::SetFederation { enabled }));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::TakeSnapshot));
        self
    }

    /// Build the simulator with all nodes and topology.
    pub fn build(self) -> (Simulator, Vec<NodeId>) {
        let node_ids: Vec<NodeId> = (0..self.num_nodes).map(Self::node_id).collect();

        let mut topo = match self.topology_type {
            TopologyType::FullyConnected => Topology::fully_connected(&node_ids),
            TopologyType::Chain => Topology::chain(&node_ids),
            TopologyType::Star => Topology::star(&node_ids),
            TopologyType::Custom(t) => t,
        };
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        topo.set_global_delay(self.delay);

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        let mut tuning = self.tuning;
        tuning.app_sink = self
            .app_sink
            .filter(|&i| i < self.num_nodes)
            .map(Self::node_id);

        for (i, &node_id) in node_ids.iter().enumerate() {
            let node_seed = self.seed.wrapping_add(i as u64 * 1000);
            sim.add_node_with_tuning(node_id, node_seed, tuning.clone());
        }

        // Initial state, before any node has learned or merged anything
        sim.take_snapshot();

        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        (sim, node_ids)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

/// Convenience function to create a simple N-node fully connected scenario.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}

/// Star scenario where every spoke reports to the hub once a minute.
pub fn collection_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes)
        .star_topology()
        .with_app_sink(0, Duration::from_secs(60))
}
