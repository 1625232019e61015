//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use rltsch::{NodeId, Timestamp};

/// Learning state of every node at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Value table of each node.
    pub tables: HashMap<NodeId, Vec<f32>>,
    /// Exploration rate of each node.
    pub epsilons: HashMap<NodeId, f32>,
    /// Installed slotframe size of each node.
    pub slotframe_sizes: HashMap<NodeId, u16>,
    /// Registry size of each node.
    pub neighbor_counts: HashMap<NodeId, usize>,
}

impl PolicySnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            tables: HashMap::new(),
            epsilons: HashMap::new(),
            slotframe_sizes: HashMap::new(),
            neighbor_counts: HashMap::new(),
        }
    }

    /// Record a node's state.
    pub fn record_node(
        &mut self,
        node_id: NodeId,
        table: Vec<f32>,
        epsilon: f32,
        slotframe_size: u16,
        neighbor_count: usize,
    ) {
        self.tables.insert(node_id, table);
        self.epsilons.insert(node_id, epsilon);
        self.slotframe_sizes.insert(node_id, slotframe_size);
        self.neighbor_counts.insert(node_id, neighbor_count);
    }

    pub fn node_count(&self) -> usize {
        self.tables.len()
    }

    /// Largest per-action gap between any two nodes' values.
    ///
    /// Zero with fewer than two nodes.
    pub fn table_spread(&self) -> f32 {
        let width = self.tables.values().map(Vec::len).min().unwrap_or(0);
        (0..width)
            .map(|action| {
                let (lo, hi) = self
                    .tables
                    .values()
                    .map(|table| table[action])
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                hi - lo
            })
            .fold(0.0, f32::max)
    }

    /// Whether every node holds at least one neighbor policy.
    pub fn all_have_neighbor(&self) -> bool {
        self.neighbor_counts.values().all(|&count| count > 0)
    }

    pub fn mean_epsilon(&self) -> f32 {
        if self.epsilons.is_empty() {
            return 0.0;
        }
        self.epsilons.values().sum::<f32>() / self.epsilons.len() as f32
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Broadcast datagrams (policies) routed.
    pub messages_sent: u64,
    /// Broadcast copies lost to link loss.
    pub messages_dropped: u64,
    /// Datagrams handed to a node's network handler.
    pub messages_delivered: u64,
    /// Unicast datagrams queued at the link layer.
    pub app_enqueued: u64,
    /// Unicast datagrams dropped because the link-layer queue was full.
    pub queue_overflows: u64,
    /// Unicast packets that made it over the air.
    pub app_transmitted: u64,
    /// Unicast datagrams handed to their destination.
    pub app_delivered: u64,
    /// Transmission rounds where every attempt failed.
    pub radio_failures: u64,
    /// Packets that lost at least one attempt to a contending neighbor.
    pub collisions: u64,
    /// Policy snapshots taken at intervals.
    pub snapshots: Vec<PolicySnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: PolicySnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn first_snapshot(&self) -> Option<&PolicySnapshot> {
        self.snapshots.first()
    }

    pub fn latest_snapshot(&self) -> Option<&PolicySnapshot> {
        self.snapshots.last()
    }

    /// First time every node held a neighbor policy.
    pub fn neighbor_discovery_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.node_count() > 0 && s.all_have_neighbor())
            .map(|s| s.time)
    }

    /// Table spread of each snapshot in time order.
    pub fn spread_history(&self) -> Vec<(Timestamp, f32)> {
        self.snapshots
            .iter()
            .map(|s| (s.time, s.table_spread()))
            .collect()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Table spread at the end of the run.
    pub fn final_spread(&self) -> f32 {
        self.metrics
            .latest_snapshot()
            .map(|s| s.table_spread())
            .unwrap_or(0.0)
    }

    /// Whether every node held a neighbor policy at the end of the run.
    pub fn all_have_neighbor(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.all_have_neighbor())
    }
}
