//! Discrete event simulator for rltsch nodes.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use log::{debug, trace};
use rltsch::{Datagram, Destination, Duration, LinkAddr, NodeId, Timestamp, Tuning, APP_PORT};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{PolicySnapshot, SimMetrics, SimulationResult};
use crate::node::{Outgoing, PendingPacket, SimNode};
use crate::topology::Topology;

/// Attempts the link layer makes before leaving a packet queued.
pub const MAX_TX_ATTEMPTS: u8 = 4;

/// Extra per-attempt failure probability for each neighbor that also
/// transmits on the chosen timeslot.
pub const CONTENTION_LOSS: f64 = 0.15;

/// Discrete event simulator for rltsch networks.
pub struct Simulator {
    /// All nodes in the simulation.
    nodes: HashMap<NodeId, SimNode>,
    /// Network topology.
    topology: Topology,
    /// Current simulation time.
    current_time: Timestamp,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Timer each node is currently armed for; older timer events are stale.
    armed: HashMap<NodeId, Timestamp>,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// RNG state for loss and link choice.
    rng_state: u64,
    /// Interval for automatic snapshots.
    snapshot_interval: Option<Duration>,
    /// Next snapshot time.
    next_snapshot: Option<Timestamp>,
    #[cfg(test)]
    pub timer_fire_count: u64,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            armed: HashMap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            snapshot_interval: None,
            next_snapshot: None,
            #[cfg(test)]
            timer_fire_count: 0,
        }
    }

    /// Set the network topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Record a policy snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node with default tuning.
    pub fn add_node(&mut self, node_id: NodeId, seed: u64) -> NodeId {
        self.add_node_with_tuning(node_id, seed, Tuning::default())
    }

    /// Add and initialize a node. A node already using `node_id` is replaced.
    pub fn add_node_with_tuning(&mut self, node_id: NodeId, seed: u64, tuning: Tuning) -> NodeId {
        let mut node = SimNode::new(node_id, seed, tuning, self.current_time);
        node.initialize(self.current_time);
        self.nodes.insert(node_id, node);

        self.collect_outgoing(node_id);
        self.rearm_timer(node_id);
        node_id
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    /// All node ids, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::Scenario(action));
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Run until the event queue is empty or `max_events` were processed.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        let mut processed = 0;

        while let Some(event) = self.event_queue.pop() {
            self.advance_time(event.time);
            self.process_event(event.event);

            processed += 1;
            if processed >= max_events {
                break;
            }

            self.maybe_take_snapshot();
        }

        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::Deliver { to, datagram } => self.deliver(to, datagram),
            Event::Timer { node } => self.fire_timer(node),
            Event::Scenario(action) => self.execute_action(action),
        }
    }

    /// Hand a datagram to its destination node.
    fn deliver(&mut self, to: NodeId, datagram: Datagram) {
        let now = self.current_time;
        let port = datagram.port;
        if let Some(node) = self.nodes.get_mut(&to) {
            node.handle_datagram(datagram, now);
            self.metrics.messages_delivered += 1;
            if port == APP_PORT {
                self.metrics.app_delivered += 1;
            }
        }
        self.collect_outgoing(to);
    }

    fn fire_timer(&mut self, node_id: NodeId) {
        let now = self.current_time;
        if self.armed.get(&node_id) != Some(&now) {
            return;
        }
        self.armed.remove(&node_id);

        #[cfg(test)]
        {
            self.timer_fire_count += 1;
        }

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.handle_timer(now);
        }

        self.collect_outgoing(node_id);
        // Retry whatever an earlier round left queued
        self.service_radio(node_id);
        self.rearm_timer(node_id);
    }

    /// Schedule a timer event at the node's next deadline, unless one is
    /// already armed for that time.
    fn rearm_timer(&mut self, node_id: NodeId) {
        let Some(wake) = self.nodes.get(&node_id).and_then(SimNode::next_wake) else {
            return;
        };
        let wake = wake.max(self.current_time);
        if self.armed.get(&node_id) == Some(&wake) {
            return;
        }
        self.armed.insert(node_id, wake);
        self.schedule(wake, Event::Timer { node: node_id });
    }

    /// Route broadcasts and queue unicasts a node has sent.
    fn collect_outgoing(&mut self, sender: NodeId) {
        let outgoing = match self.nodes.get_mut(&sender) {
            Some(node) => node.take_outgoing(),
            None => return,
        };
        if outgoing.is_empty() {
            return;
        }

        for msg in outgoing {
            match msg.destination {
                Destination::Broadcast => self.broadcast(sender, msg),
                Destination::Node(to) => self.enqueue_unicast(sender, to, msg),
            }
        }
        self.service_radio(sender);
    }

    /// Deliver a broadcast to every neighbor in range, applying link loss.
    fn broadcast(&mut self, sender: NodeId, msg: Outgoing) {
        self.metrics.messages_sent += 1;
        let now = self.current_time;

        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.active_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay) = (link.loss_rate, link.delay);

            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.messages_dropped += 1;
                continue;
            }

            self.schedule(
                now + delay,
                Event::Deliver {
                    to: neighbor,
                    datagram: Datagram::new(sender, msg.port, msg.data.clone()),
                },
            );
        }
    }

    fn enqueue_unicast(&mut self, sender: NodeId, to: NodeId, msg: Outgoing) {
        let Some(node) = self.nodes.get_mut(&sender) else {
            return;
        };
        let packet = PendingPacket {
            to,
            datagram: Datagram::new(sender, msg.port, msg.data),
        };
        if node.transport_mut().enqueue(packet) {
            self.metrics.app_enqueued += 1;
        } else {
            self.metrics.queue_overflows += 1;
            debug!("node {}: link-layer queue full, packet dropped", sender);
        }
    }

    /// Push the sender's queued packets over the air, oldest first.
    ///
    /// Each packet goes out on a random transmit-capable link of the sender's
    /// current schedule whose timeslot the receiver listens on. Every attempt
    /// fails with the link's loss rate plus [`CONTENTION_LOSS`] per other
    /// neighbor that also transmits on that timeslot. A packet that exhausts
    /// [`MAX_TX_ATTEMPTS`], or has no usable link, stays at the head of the queue.
    fn service_radio(&mut self, sender: NodeId) {
        let now = self.current_time;

        loop {
            let Some(node) = self.nodes.get(&sender) else {
                return;
            };
            let Some(packet) = node.transport().front() else {
                return;
            };
            let to = packet.to;
            let Some(link) = self.topology.active_link(sender, to) else {
                trace!("node {}: no radio link to {}", sender, to);
                return;
            };
            let (loss_rate, delay) = (link.loss_rate, link.delay);

            let Some(receiver) = self.nodes.get(&to) else {
                return;
            };
            let candidates: Vec<_> = node
                .mac()
                .tx_links_to(LinkAddr::from_node_id(to))
                .into_iter()
                .filter(|spec| receiver.mac().listens_on(spec.timeslot))
                .collect();
            if candidates.is_empty() {
                trace!("node {}: no shared cell with {}", sender, to);
                return;
            }
            let pick = self.random_index(candidates.len());
            let spec = candidates[pick];
            let slot = spec.timeslot;

            let contenders = self
                .topology
                .neighbors(sender)
                .into_iter()
                .filter(|&n| n != to)
                .filter(|n| {
                    self.nodes
                        .get(n)
                        .is_some_and(|other| other.mac().transmits_on(slot))
                })
                .count();
            let fail_rate = (loss_rate + CONTENTION_LOSS * contenders as f64).min(1.0);

            let mut delivered_on = None;
            for attempt in 1..=MAX_TX_ATTEMPTS {
                if self.random_f64() >= fail_rate {
                    delivered_on = Some(attempt);
                    break;
                }
            }

            let collided = contenders > 0 && delivered_on != Some(1);
            let Some(node) = self.nodes.get_mut(&sender) else {
                return;
            };
            if collided {
                node.transport_mut().log_collision(slot);
                self.metrics.collisions += 1;
            }

            let Some(transmissions) = delivered_on else {
                self.metrics.radio_failures += 1;
                trace!(
                    "node {}: packet to {} failed on slot {} ({} contenders)",
                    sender,
                    to,
                    slot,
                    contenders
                );
                return;
            };

            let Some(packet) = node.transport_mut().pop_front() else {
                return;
            };
            node.transport_mut().log_tx(
                slot,
                spec.channel_offset,
                LinkAddr::from_node_id(to),
                transmissions,
            );
            if let Some(receiver) = self.nodes.get_mut(&to) {
                receiver.transport_mut().log_rx(
                    slot,
                    spec.channel_offset,
                    LinkAddr::from_node_id(sender),
                );
            }

            self.metrics.app_transmitted += 1;
            self.schedule(
                now + delay,
                Event::Deliver {
                    to,
                    datagram: packet.datagram,
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => {
                self.topology.partition(&groups);
            }
            ScenarioAction::HealPartition => {
                self.topology.heal();
            }
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::SetAggregation {
                method,
                local_weight,
            } => {
                for node in self.nodes.values_mut() {
                    let federated = node.inner_mut().federated_mut();
                    federated.set_method(method);
                    federated.set_local_weight(local_weight);
                }
            }
            ScenarioAction::SetFederation { enabled } => {
                for node in self.nodes.values_mut() {
                    node.inner_mut().federated_mut().set_enabled(enabled);
                }
            }
            ScenarioAction::TakeSnapshot => {
                self.take_snapshot();
            }
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's learning state.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = PolicySnapshot::new(self.current_time);

        for (&node_id, node) in &self.nodes {
            snapshot.record_node(
                node_id,
                node.values().to_vec(),
                node.epsilon(),
                node.slotframe_size(),
                node.neighbor_count(),
            );
        }

        self.metrics.add_snapshot(snapshot);
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }

    fn random_index(&mut self, len: usize) -> usize {
        ((self.random_f64() * len as f64) as usize).min(len.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use rltsch::debug::DebugEvent;
    use rltsch::Transport;

    use super::*;
    use crate::topology::Link;

    fn connected_pair(tuning: Tuning) -> Simulator {
        let mut sim = Simulator::new(42).with_topology(Topology::fully_connected(&[1, 2]));
        sim.add_node_with_tuning(1, 100, tuning.clone());
        sim.add_node_with_tuning(2, 200, tuning);
        sim
    }

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(42);
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert!(sim.node_ids().is_empty());
    }

    #[test]
    fn test_add_nodes() {
        let mut sim = Simulator::new(42);
        sim.add_node(2, 1);
        sim.add_node(1, 2);

        assert_eq!(sim.node_ids(), vec![1, 2]);
        assert_eq!(sim.node(1).unwrap().slotframe_size(), 8);
    }

    #[test]
    fn test_single_node_runs_cycles() {
        let mut sim = Simulator::new(42);
        sim.add_node(1, 1);

        // Warm-up ends at 120 s, cycles close at 240, 360, 480, 600
        let result = sim.run_for(Duration::from_secs(600));

        let node = sim.node(1).unwrap();
        assert_eq!(node.inner().metrics().cycles_completed, 4);
        assert_eq!(node.neighbor_count(), 0);
        assert_eq!(result.metrics.messages_delivered, 0);
        assert!(!result.queue_exhausted);
    }

    #[test]
    fn test_stale_timers_ignored() {
        let mut sim = Simulator::new(42);
        sim.add_node(1, 1);
        sim.schedule(Timestamp::from_secs(5), Event::Timer { node: 1 });

        sim.run_for(Duration::from_secs(10));
        assert_eq!(sim.timer_fire_count, 0);

        sim.run_for(Duration::from_secs(120));
        assert_eq!(sim.timer_fire_count, 1);
    }

    #[test]
    fn test_policies_reach_neighbors() {
        let mut sim = connected_pair(Tuning::default());
        // First sync lands within [180 s, 190 s]
        let result = sim.run_for(Duration::from_secs(200));

        assert_eq!(result.metrics.messages_sent, 2);
        assert_eq!(result.metrics.messages_delivered, 2);
        assert_eq!(sim.node(1).unwrap().neighbor_count(), 1);
        assert_eq!(sim.node(2).unwrap().neighbor_count(), 1);

        let events = sim.node(2).unwrap().take_debug_events();
        assert!(events.contains(&DebugEvent::PolicyStored {
            from: 1,
            samples: 0
        }));
    }

    #[test]
    fn test_full_loss_blocks_policies() {
        let mut sim = Simulator::new(42);
        let mut topo = Topology::new();
        topo.add_link(1, 2, Link::new().with_loss_rate(1.0));
        sim = sim.with_topology(topo);
        sim.add_node(1, 1);
        sim.add_node(2, 2);

        let result = sim.run_for(Duration::from_secs(400));
        assert_eq!(result.metrics.messages_delivered, 0);
        assert_eq!(result.metrics.messages_dropped, result.metrics.messages_sent);
        assert_eq!(sim.node(1).unwrap().neighbor_count(), 0);
    }

    #[test]
    fn test_app_packets_become_packet_records() {
        let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
        let mut sim = connected_pair(tuning);

        // First send at 180 s, then every minute; the cycle closing at 360 s sees them
        sim.run_for(Duration::from_secs(359));
        let sender = sim.node(2).unwrap();
        assert_eq!(sender.inner().metrics().app_sent, 3);
        // Lossless and uncontended: every packet leaves on its first attempt
        assert_eq!(sim.metrics().app_transmitted, 3);

        sim.run_for(Duration::from_secs(1));
        let sender = sim.node(2).unwrap();
        let report = sender.inner().last_cycle().unwrap();
        // The 240 s and 300 s packets; the 360 s one goes out after the cycle closes
        assert_eq!(report.tx, 2);
        assert_eq!(report.mean_retrans, 1.0);

        let sink = sim.node(1).unwrap();
        assert!(sink.inner().last_cycle().unwrap().rx >= 1);
        assert_eq!(
            sink.inner().metrics().app_received as u64,
            sim.metrics().app_delivered
        );
    }

    #[test]
    fn test_unreachable_sink_fills_queue() {
        let tuning = Tuning::default().with_app_traffic(Some(3), Duration::from_secs(60));
        let mut sim = Simulator::new(42).with_topology(Topology::chain(&[1, 2, 3]));
        sim.add_node(3, 3);
        sim.add_node(2, 2);
        sim.add_node_with_tuning(1, 1, tuning);

        sim.run_for(Duration::from_secs(600));
        // Sends at 180..=600, none can leave node 1
        let node = sim.node(1).unwrap();
        assert_eq!(node.transport().front().map(|p| p.to), Some(3));
        assert_eq!(sim.metrics().app_enqueued, 8);
        assert_eq!(sim.metrics().app_transmitted, 0);
        assert_eq!(sim.node(3).unwrap().inner().metrics().app_received, 0);
    }

    #[test]
    fn test_schedule_action() {
        let mut sim = Simulator::new(42).with_topology(Topology::fully_connected(&[1, 2]));
        sim.add_node(1, 1);
        sim.add_node(2, 2);

        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::Partition {
                groups: vec![vec![1], vec![2]],
            },
        );
        sim.run_for(Duration::from_secs(1));

        assert!(!sim.topology().is_connected(1, 2));
    }

    #[test]
    fn test_aggregation_switch_reaches_every_node() {
        let mut sim = connected_pair(Tuning::default());
        sim.schedule_action(
            Timestamp::from_secs(1),
            ScenarioAction::SetAggregation {
                method: rltsch::AggregationMethod::Median,
                local_weight: 0.25,
            },
        );
        sim.schedule_action(
            Timestamp::from_secs(2),
            ScenarioAction::SetFederation { enabled: false },
        );
        sim.run_for(Duration::from_secs(3));

        for id in [1, 2] {
            let federated = sim.node(id).unwrap().inner().federated();
            assert_eq!(federated.method(), rltsch::AggregationMethod::Median);
            assert_eq!(federated.local_weight(), 0.25);
            assert!(!federated.is_enabled());
        }
    }

    #[test]
    fn test_snapshot_interval() {
        let mut sim = Simulator::new(42).with_snapshot_interval(Duration::from_secs(60));
        sim.add_node(1, 1);
        let result = sim.run_for(Duration::from_secs(300));

        // Interval snapshots are taken on the first event past each boundary
        assert!(result.metrics.snapshots.len() >= 3);
        let last = result.metrics.latest_snapshot().unwrap();
        assert_eq!(last.time, Timestamp::from_secs(300));
        assert_eq!(last.tables[&1].len(), 8);
    }

    #[test]
    fn test_policies_skip_link_layer_queue() {
        let mut sim = connected_pair(Tuning::default());
        sim.run_for(Duration::from_secs(200));
        assert_eq!(sim.metrics().app_enqueued, 0);
        assert_eq!(sim.node(1).unwrap().transport().queue_length(), 0);
    }

    #[test]
    fn test_contention_logs_collisions() {
        let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
        let mut topo = Topology::fully_connected(&[1, 2, 3, 4, 5, 6, 7]);
        topo.set_global_loss_rate(0.3);
        let mut sim = Simulator::new(7).with_topology(topo);
        for id in 1..=7 {
            sim.add_node_with_tuning(id, id as u64 * 31, tuning.clone());
        }

        let result = sim.run_for(Duration::from_secs(1800));
        // Everyone transmits on the advertising slot: 0.3 + 5 * 0.15 never clears
        assert!(result.metrics.radio_failures > 0);
        assert!(result.metrics.collisions > 0);
        assert!(result.metrics.app_transmitted <= result.metrics.app_enqueued);
    }
}
