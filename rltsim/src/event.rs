//! Event types and priority queue ordering for the discrete event simulation.

use std::cmp::Ordering;

use rltsch::{AggregationMethod, Datagram, NodeId, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<NodeId>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Disable a specific link.
    DisableLink { from: NodeId, to: NodeId },
    /// Enable a specific link.
    EnableLink { from: NodeId, to: NodeId },
    /// Set loss rate on a link.
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    /// Switch every node's aggregation method and local weight.
    SetAggregation {
        method: AggregationMethod,
        local_weight: f32,
    },
    /// Turn policy merging on or off on every node.
    SetFederation { enabled: bool },
    /// Record a policy snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// Hand a datagram to a node's network handler.
    Deliver { to: NodeId, datagram: Datagram },
    /// A node's earliest deadline has come due.
    Timer { node: NodeId },
    /// Execute a scenario action.
    Scenario(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// BinaryHeap is a max-heap, so the ordering is reversed.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
