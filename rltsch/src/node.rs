//! Node implementation - the scheduler's state machine.
//!
//! The Node struct owns every learning component and provides an async `run()`
//! method that drives them. It is fully event-driven:
//! - The cycle timer closes one learning cycle and opens the next
//! - The sync timer shares and merges value tables with neighbors
//! - The application timer sends payloads to the configured sink
//! - Incoming datagrams are counted (application) or stored (policies)
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::<_, _, _, _, _, DefaultConfig>::new(
//!     node_id, mac, transport, network, random, clock, Tuning::default(),
//! );
//!
//! // Spawn the node's run loop
//! spawn(async move {
//!     node.run().await;
//! });
//! ```

use core::marker::PhantomData;

use log::{debug, info};

#[cfg(any(test, feature = "debug"))]
use embassy_sync::channel::Channel;

use crate::config::{DefaultConfig, SchedulerConfig, Tuning};
use crate::cycle::{CycleReport, Phase};
#[cfg(any(test, feature = "debug"))]
use crate::debug::{DebugChannel, DebugEvent};
use crate::federated::FederatedAggregator;
use crate::learner::QLearner;
use crate::reward::RewardModel;
use crate::schedule::Schedule;
use crate::slots::{ReconfigReport, SlotStatsTracker};
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, MacSchedule, Network, Random, Transport};
use crate::types::{
    Datagram, Destination, NodeId, NodeMetrics, APP_PORT, DEFAULT_SLOTFRAME_SIZE, POLICY_PORT,
};
use crate::wire::app_payload;

/// The adaptive scheduler node.
///
/// Generic over:
/// - `M`: schedule executor of the link layer
/// - `T`: packet log and queue of the link layer
/// - `N`: datagram network
/// - `R`: random number generator
/// - `Clk`: clock/timer implementation
/// - `Cfg`: memory bounds
///
/// The node is fully event-driven. Call `run()` to start the main loop, or call
/// `initialize`, `handle_timer` and `handle_network_rx` directly from a
/// simulator.
pub struct Node<M, T, N, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    schedule: Schedule<M>,
    transport: T,
    network: N,
    random: R,
    clock: Clk,

    node_id: NodeId,
    tuning: Tuning,

    // Learning state
    learner: QLearner,
    slots: SlotStatsTracker,
    federated: FederatedAggregator,
    reward_model: RewardModel,

    // Timers
    phase: Phase,
    next_sync: Option<Timestamp>,
    next_app_send: Option<Timestamp>,

    app_sequence: u32,
    last_cycle: Option<CycleReport>,
    metrics: NodeMetrics,

    #[cfg(any(test, feature = "debug"))]
    debug: DebugChannel,

    _config: PhantomData<Cfg>,
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
    /// Create a node. Nothing is installed until [`initialize`](Self::initialize).
    ///
    /// `tuning` is clamped into legal ranges first.
    pub fn new(
        node_id: NodeId,
        mac: M,
        transport: T,
        network: N,
        mut random: R,
        clock: Clk,
        tuning: Tuning,
    ) -> Self {
        let tuning = tuning.validated(Cfg::MAX_TRACKED_SLOTS);
        let learner = QLearner::new(
            Cfg::TABLE_SIZE,
            tuning.alpha,
            tuning.gamma,
            tuning.initial_epsilon,
            &mut random,
        );
        let initial_size = DEFAULT_SLOTFRAME_SIZE.min(Cfg::MAX_TRACKED_SLOTS as u16);
        let slots = SlotStatsTracker::new(initial_size, Cfg::MAX_TRACKED_SLOTS, &tuning);
        let federated = FederatedAggregator::new(Cfg::MAX_NEIGHBORS, learner.len(), &tuning);
        let reward_model = RewardModel::from_tuning(&tuning);

        Self {
            schedule: Schedule::new(mac),
            transport,
            network,
            random,
            clock,

            node_id,
            tuning,

            learner,
            slots,
            federated,
            reward_model,

            phase: Phase::Idle,
            next_sync: None,
            next_app_send: None,

            app_sequence: 0,
            last_cycle: None,
            metrics: NodeMetrics::default(),

            #[cfg(any(test, feature = "debug"))]
            debug: Channel::new(),

            _config: PhantomData,
        }
    }

    /// Run the node's main loop.
    ///
    /// Installs the initial schedule, then runs forever, racing inbound
    /// datagrams against the next timer deadline.
    ///
    /// Call this from an async task/executor.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select, Either};

        let now = self.clock.now();
        self.initialize(now);

        loop {
            let wake = self
                .next_wake()
                .unwrap_or_else(|| self.clock.now() + Duration::from_secs(60));

            let result = select(
                self.network.incoming().receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            match result {
                Either::First(datagram) => {
                    let now = self.clock.now();
                    self.handle_network_rx(datagram, now);
                }
                Either::Second(()) => {
                    let now = self.clock.now();
                    self.handle_timer(now);
                }
            }
        }
    }

    /// Install the initial schedule and arm the timers.
    pub fn initialize(&mut self, now: Timestamp) {
        let size = self.slots.slotframe_size();
        let installed = self.rebuild_schedule(size);
        info!(
            "node {} started: slotframe={} links={} warmup={}s",
            self.node_id,
            size,
            installed,
            self.tuning.warmup.as_secs()
        );

        let warmup_end = now + self.tuning.warmup;
        self.phase = Phase::WarmUp { until: warmup_end };
        let delay = self.sync_delay();
        self.next_sync = Some(now + delay);
        self.next_app_send = self
            .app_sink()
            .map(|_| warmup_end + self.tuning.app_send_interval);
    }

    /// Earliest pending deadline, or `None` before `initialize`.
    pub fn next_wake(&self) -> Option<Timestamp> {
        let cycle = match self.phase {
            Phase::Idle => None,
            Phase::WarmUp { until } => Some(until),
            Phase::Observing(state) => Some(state.deadline),
        };
        [cycle, self.next_sync, self.next_app_send]
            .into_iter()
            .flatten()
            .min()
    }

    /// Handle timer events (cycle boundary, sync, application send).
    pub fn handle_timer(&mut self, now: Timestamp) {
        match self.phase {
            Phase::WarmUp { until } if now >= until => {
                info!("warm-up finished, starting learning cycles");
                self.start_cycle(now);
            }
            Phase::Observing(state) if now >= state.deadline => {
                let report = self.finish_cycle(now, state);
                self.last_cycle = Some(report);
                self.start_cycle(now);
            }
            _ => {}
        }

        if let Some(next_sync) = self.next_sync {
            if now >= next_sync {
                self.run_sync(now);
                let delay = self.sync_delay();
                self.next_sync = Some(now + delay);
            }
        }

        if let Some(next_app) = self.next_app_send {
            if now >= next_app {
                self.send_app_payload(now);
                self.next_app_send = Some(now + self.tuning.app_send_interval);
            }
        }
    }

    /// Handle an inbound datagram, dispatching by port.
    pub fn handle_network_rx(&mut self, datagram: Datagram, now: Timestamp) {
        match datagram.port {
            APP_PORT => {
                self.metrics.app_received += 1;
                debug!(
                    "app payload from node {} ({} bytes)",
                    datagram.from,
                    datagram.data.len()
                );
            }
            POLICY_PORT => self.handle_policy(datagram.from, &datagram.data, now),
            port => debug!("ignored datagram on port {}", port),
        }
    }

    fn send_app_payload(&mut self, now: Timestamp) {
        let Some(sink) = self.app_sink() else {
            return;
        };

        self.app_sequence = self.app_sequence.wrapping_add(1);
        let payload = app_payload(self.app_sequence, self.tuning.app_payload_len);
        if self
            .network
            .send(APP_PORT, payload, Destination::Node(sink))
        {
            self.metrics.app_sent += 1;
            info!(
                "app packet {} to node {} at {}s",
                self.app_sequence,
                sink,
                now.as_secs()
            );
        } else {
            debug!("app packet {} not sent", self.app_sequence);
        }
    }

    /// Configured sink, unless it is this node.
    fn app_sink(&self) -> Option<NodeId> {
        self.tuning.app_sink.filter(|&sink| sink != self.node_id)
    }

    // --- Accessors ---

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn learner(&self) -> &QLearner {
        &self.learner
    }

    pub fn slots(&self) -> &SlotStatsTracker {
        &self.slots
    }

    pub fn federated(&self) -> &FederatedAggregator {
        &self.federated
    }

    /// Mutable access for runtime aggregation control.
    pub fn federated_mut(&mut self) -> &mut FederatedAggregator {
        &mut self.federated
    }

    pub fn reward_model(&self) -> &RewardModel {
        &self.reward_model
    }

    pub fn schedule(&self) -> &Schedule<M> {
        &self.schedule
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Report of the most recently completed cycle.
    pub fn last_cycle(&self) -> Option<&CycleReport> {
        self.last_cycle.as_ref()
    }

    pub fn next_sync(&self) -> Option<Timestamp> {
        self.next_sync
    }

    pub fn next_app_send(&self) -> Option<Timestamp> {
        self.next_app_send
    }

    // --- Crate-internal helpers for the cycle and sync modules ---

    pub(crate) fn learner_mut(&mut self) -> &mut QLearner {
        &mut self.learner
    }

    pub(crate) fn learner_and_random(&mut self) -> (&QLearner, &mut R) {
        (&self.learner, &mut self.random)
    }

    pub(crate) fn random_mut(&mut self) -> &mut R {
        &mut self.random
    }

    pub(crate) fn slots_mut(&mut self) -> &mut SlotStatsTracker {
        &mut self.slots
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut NodeMetrics {
        &mut self.metrics
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Rebuild the schedule from the tracker's slot records.
    pub(crate) fn rebuild_schedule(&mut self, size: u16) -> usize {
        self.schedule.rebuild(size, self.slots.records())
    }

    pub(crate) fn reconfigure_slots(&mut self) -> ReconfigReport {
        self.slots.reconfigure(&mut self.schedule)
    }

    /// Merge the neighbor registry into the local value table.
    pub(crate) fn aggregate_policies(&mut self) -> usize {
        self.federated.aggregate(self.learner.values_mut())
    }

    // --- Debug tracing ---

    /// Channel of protocol trace events.
    #[cfg(any(test, feature = "debug"))]
    pub fn debug_channel(&self) -> &DebugChannel {
        &self.debug
    }

    /// Push a trace event, dropping it if the channel is full.
    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn emit_debug_event(&self, event: DebugEvent) {
        let _ = self.debug.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx_eq;
    use crate::debug::DebugEvent;
    use crate::traits::test_impls::{
        FixedRandom, MockClock, MockNetwork, MockRandom, MockSchedule, MockTransport,
    };
    use crate::slots::SlotChange;
    use crate::types::{AggregationMethod, LinkAddr, SlotConfig};
    use crate::wire::{Decode, DecodeError, Encode, PolicyMessage};
    use alloc::vec;
    use alloc::vec::Vec;

    type TestNode<R = MockRandom> =
        Node<MockSchedule, MockTransport, MockNetwork, R, MockClock, DefaultConfig>;

    fn make_node(node_id: NodeId, tuning: Tuning) -> TestNode {
        Node::new(
            node_id,
            MockSchedule::new(),
            MockTransport::new(),
            MockNetwork::new(),
            MockRandom::new(),
            MockClock::new(),
            tuning,
        )
    }

    /// Every random draw returns 0.5: initial values tie, selection is greedy
    /// (0.5 >= epsilon) and sync jitter is half the configured jitter.
    fn scripted_node(node_id: NodeId, tuning: Tuning) -> TestNode<FixedRandom> {
        Node::new(
            node_id,
            MockSchedule::new(),
            MockTransport::new(),
            MockNetwork::new(),
            FixedRandom::new(&[0.5]),
            MockClock::new(),
            tuning,
        )
    }

    fn policy(sender: NodeId, samples: u8, table: Vec<f32>) -> Datagram {
        let msg = PolicyMessage {
            sender,
            samples,
            table,
        };
        Datagram::new(sender, POLICY_PORT, msg.encode_to_vec())
    }

    fn drain_debug<R: Random>(node: &TestNode<R>) -> Vec<DebugEvent> {
        let mut events = Vec::new();
        while let Ok(event) = node.debug_channel().try_receive() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_node_creation() {
        let node = make_node(7, Tuning::default());
        assert_eq!(node.node_id(), 7);
        assert_eq!(node.learner().len(), DefaultConfig::TABLE_SIZE);
        assert!(node.learner().values().iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(node.phase(), Phase::Idle);
        assert!(!node.schedule().is_installed());
        assert_eq!(node.next_wake(), None);
    }

    #[test]
    fn test_initialize_installs_default_schedule() {
        let mut node = make_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);

        assert_eq!(node.schedule().size(), DEFAULT_SLOTFRAME_SIZE);
        assert_eq!(node.schedule().mac().links().count(), 8);
        assert_eq!(
            node.phase(),
            Phase::WarmUp {
                until: Timestamp::from_secs(120)
            }
        );
        // Sync fires after its period plus jitter, no app traffic without a sink
        let sync = node.next_sync().unwrap();
        assert!(sync >= Timestamp::from_secs(180) && sync <= Timestamp::from_secs(190));
        assert_eq!(node.next_app_send(), None);
        assert_eq!(node.next_wake(), Some(Timestamp::from_secs(120)));
    }

    #[test]
    fn test_warmup_ends_with_first_cycle() {
        let mut node = make_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);

        node.handle_timer(Timestamp::from_secs(60));
        assert!(matches!(node.phase(), Phase::WarmUp { .. }));

        node.handle_timer(Timestamp::from_secs(120));
        let Phase::Observing(state) = node.phase() else {
            panic!("expected an observing cycle");
        };
        assert_eq!(state.deadline, Timestamp::from_secs(240));
        assert_eq!(state.slotframe_size, node.slotframe_size_for(state.action));
        assert_eq!(node.schedule().size(), state.slotframe_size);
        assert_eq!(node.slots().slotframe_size(), state.slotframe_size);
    }

    #[test]
    fn test_cycle_scores_traffic_and_updates_table() {
        let mut node = scripted_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.handle_timer(Timestamp::from_secs(120));

        // Ties resolve to action 0, the smallest slotframe
        let Phase::Observing(state) = node.phase() else {
            panic!("expected an observing cycle");
        };
        assert_eq!(state.action, 0);
        assert_eq!(state.slotframe_size, 2);

        node.transport_mut().push_tx(1, 2, 1);
        node.transport_mut().push_tx(1, 2, 1);
        node.transport_mut().push_rx(1, 3);
        node.handle_timer(Timestamp::from_secs(240));

        let report = node.last_cycle().unwrap().clone();
        assert_eq!((report.tx, report.rx), (2, 1));
        assert_eq!(report.mean_retrans, 1.0);
        // 3 * 3 packets, nothing drained from the buffer, no retransmissions
        assert!(approx_eq(report.reward, 9.0 + report.bonus));

        // 0.9 * 0.5 + 0.1 * (reward + 0.9 * 0.5)
        let expected = 0.45 + 0.1 * (report.reward + 0.45);
        assert!(approx_eq(node.learner().values()[0], expected));

        assert_eq!(node.metrics().cycles_completed, 1);
        assert_eq!(node.federated().local_samples(), 1);
        assert!(approx_eq(node.learner().epsilon(), 0.285));
        assert_eq!(node.slots().cycle(), 1);

        // Next cycle is already running
        let Phase::Observing(next) = node.phase() else {
            panic!("expected an observing cycle");
        };
        assert_eq!(next.deadline, Timestamp::from_secs(360));
    }

    #[test]
    fn test_buffer_and_retransmissions_feed_reward() {
        let mut node = scripted_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.transport_mut().set_queue_length(10);
        node.handle_timer(Timestamp::from_secs(120));

        node.transport_mut().set_queue_length(4);
        node.transport_mut().push_tx(1, 2, 3);
        node.handle_timer(Timestamp::from_secs(240));

        let report = node.last_cycle().unwrap();
        assert_eq!((report.buffer_before, report.buffer_after), (10, 4));
        assert_eq!(report.mean_retrans, 3.0);
        // 3 * 1 - 0.5 * 6 - 2 * (3 - 1)
        assert!(approx_eq(report.reward, -4.0 + report.bonus));
    }

    #[test]
    fn test_reconfiguration_runs_on_interval() {
        let mut node = scripted_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.handle_timer(Timestamp::from_secs(120));

        for cycle in 1..=3 {
            node.handle_timer(Timestamp::from_secs(120 + 120 * cycle));
            assert!(node.last_cycle().unwrap().reconfig.is_none());
        }
        assert_eq!(node.metrics().reconfigurations, 0);
        drain_debug(&node);

        // The fourth cycle sees cycle counter 3
        node.handle_timer(Timestamp::from_secs(600));
        let report = node.last_cycle().unwrap();
        let reconfig = report.reconfig.as_ref().unwrap();
        assert!(reconfig.deactivated() >= 1);
        assert_eq!(node.metrics().reconfigurations, 1);

        let events = drain_debug(&node);
        assert!(events
            .iter()
            .any(|e| matches!(e, DebugEvent::SlotDeactivated { .. })));
    }

    #[test]
    fn test_reconfiguration_reads_closing_cycle_statistics() {
        let mut node = scripted_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.handle_timer(Timestamp::from_secs(120));
        for cycle in 1..=3 {
            node.handle_timer(Timestamp::from_secs(120 + 120 * cycle));
        }

        // Traffic logged only during the reconfiguring cycle
        for _ in 0..5 {
            node.transport_mut().push_tx(1, 2, 1);
        }
        node.handle_timer(Timestamp::from_secs(600));

        let record = node.slots().record(1).unwrap();
        assert_eq!(record.config, SlotConfig::DedicatedTx);
        assert_eq!(record.usage_count, 0);
        assert_eq!(node.slots().dedicated_slots(), 1);

        let reconfig = node.last_cycle().unwrap().reconfig.as_ref().unwrap();
        assert_eq!(reconfig.promoted(), 1);
        assert!(reconfig.changes.contains(&SlotChange::Promoted {
            slot: 1,
            peer: LinkAddr::from_node_id(2),
        }));
    }

    #[test]
    fn test_policy_rx_stored() {
        let mut node = make_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.handle_network_rx(policy(9, 4, vec![1.0; 8]), Timestamp::from_secs(10));

        assert_eq!(node.metrics().policies_received, 1);
        let entry = node.federated().neighbor(9).unwrap();
        assert_eq!(entry.samples, 4);
        assert_eq!(entry.last_seen, Timestamp::from_secs(10));
        assert!(drain_debug(&node).contains(&DebugEvent::PolicyStored {
            from: 9,
            samples: 4
        }));
    }

    #[test]
    fn test_sync_broadcasts_then_aggregates() {
        let mut node = scripted_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.handle_network_rx(policy(9, 4, vec![1.0; 8]), Timestamp::from_secs(10));

        let sync = node.next_sync().unwrap();
        node.handle_timer(sync);

        let sent = node.network_mut().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].port, POLICY_PORT);
        assert_eq!(sent[0].destination, Destination::Broadcast);
        let msg = PolicyMessage::decode_from_slice(&sent[0].data).unwrap();
        assert_eq!(msg.sender, 7);
        assert_eq!(msg.samples, 0);
        // Broadcast carries the table as it was before the merge
        assert_eq!(msg.table, vec![0.5; 8]);

        // mean(0.5, 1.0) blended at 0.5
        assert!(node
            .learner()
            .values()
            .iter()
            .all(|&v| approx_eq(v, 0.625)));
        assert_eq!(node.metrics().aggregations, 1);
        assert_eq!(node.metrics().policies_sent, 1);
        assert!(node.next_sync().unwrap() > sync);
    }

    #[test]
    fn test_sync_expires_quiet_neighbors() {
        let mut node = make_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        node.handle_network_rx(policy(9, 1, vec![1.0; 8]), Timestamp::ZERO);
        drain_debug(&node);

        // ttl is twice the sync period
        assert_eq!(node.neighbor_ttl(), Duration::from_secs(360));
        node.run_sync(Timestamp::from_secs(361));

        assert_eq!(node.federated().neighbor_count(), 0);
        assert_eq!(node.metrics().aggregations, 0);
        assert!(drain_debug(&node).contains(&DebugEvent::NeighborExpired { node_id: 9 }));
    }

    #[test]
    fn test_disabled_federation_keeps_local_table() {
        let mut node = scripted_node(7, Tuning::default().with_federation(false));
        node.initialize(Timestamp::ZERO);
        node.handle_network_rx(policy(9, 4, vec![1.0; 8]), Timestamp::from_secs(10));
        node.run_sync(Timestamp::from_secs(20));

        assert_eq!(node.learner().values(), &[0.5; 8]);
        assert_eq!(node.metrics().aggregations, 0);
    }

    #[test]
    fn test_malformed_policies_dropped() {
        let mut node = make_node(7, Tuning::default());

        // Wrong table size for this node
        node.handle_network_rx(policy(9, 1, vec![1.0; 4]), Timestamp::ZERO);

        // Length disagrees with the declared size
        let mut truncated = policy(10, 1, vec![1.0; 8]);
        truncated.data.pop();
        node.handle_network_rx(truncated, Timestamp::ZERO);

        assert_eq!(node.metrics().policies_dropped, 2);
        assert_eq!(node.metrics().policies_received, 0);
        assert_eq!(node.federated().neighbor_count(), 0);

        let errors: Vec<_> = drain_debug(&node)
            .into_iter()
            .filter_map(|e| match e {
                DebugEvent::PolicyDecodeFailed { error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(
            errors,
            vec![DecodeError::TableSizeMismatch, DecodeError::InvalidLength]
        );
    }

    #[test]
    fn test_own_policy_ignored() {
        let mut node = make_node(7, Tuning::default());
        node.handle_network_rx(policy(7, 1, vec![1.0; 8]), Timestamp::ZERO);

        assert_eq!(node.federated().neighbor_count(), 0);
        assert_eq!(node.metrics().policies_dropped, 1);
    }

    #[test]
    fn test_full_registry_drops_new_senders() {
        let mut node = make_node(7, Tuning::default());
        for sender in 100..100 + DefaultConfig::MAX_NEIGHBORS as NodeId {
            node.handle_network_rx(policy(sender, 1, vec![0.0; 8]), Timestamp::ZERO);
        }
        node.handle_network_rx(policy(999, 1, vec![0.0; 8]), Timestamp::ZERO);

        assert_eq!(
            node.federated().neighbor_count(),
            DefaultConfig::MAX_NEIGHBORS
        );
        assert_eq!(node.metrics().policies_dropped, 1);
        assert!(node.federated().neighbor(999).is_none());
    }

    #[test]
    fn test_non_finite_policy_rejected() {
        let mut node = make_node(7, Tuning::default());
        node.initialize(Timestamp::ZERO);
        let before = node.learner().values().to_vec();

        let mut table = vec![1.0; 8];
        table[3] = f32::NAN;
        node.handle_network_rx(policy(9, 4, table), Timestamp::from_secs(10));

        assert_eq!(node.federated().neighbor_count(), 0);
        assert_eq!(node.metrics().policies_dropped, 1);
        assert!(drain_debug(&node).contains(&DebugEvent::PolicyRejected {
            from: 9,
            reason: "non-finite values",
        }));
        assert_eq!(node.aggregate_policies(), 0);
        assert_eq!(node.learner().values(), &before[..]);
    }

    #[test]
    fn test_app_traffic_after_warmup() {
        let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
        let mut node = make_node(7, tuning);
        node.initialize(Timestamp::ZERO);
        assert_eq!(node.next_app_send(), Some(Timestamp::from_secs(180)));

        node.handle_timer(Timestamp::from_secs(120));
        assert!(node.network_mut().take_sent().is_empty());

        node.handle_timer(Timestamp::from_secs(180));
        let app: Vec<_> = node
            .network_mut()
            .take_sent()
            .into_iter()
            .filter(|d| d.port == APP_PORT)
            .collect();
        assert_eq!(app.len(), 1);
        assert_eq!(app[0].destination, Destination::Node(1));
        assert_eq!(app[0].data.len(), 125);
        assert_eq!(&app[0].data[..4], &1u32.to_be_bytes());
        assert_eq!(node.metrics().app_sent, 1);
        assert_eq!(node.next_app_send(), Some(Timestamp::from_secs(240)));
    }

    #[test]
    fn test_sink_never_sends_to_itself() {
        let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
        let mut node = make_node(1, tuning);
        node.initialize(Timestamp::ZERO);
        assert_eq!(node.next_app_send(), None);
    }

    #[test]
    fn test_app_rx_counted() {
        let mut node = make_node(1, Tuning::default());
        node.handle_network_rx(
            Datagram::new(5, APP_PORT, app_payload(1, 125)),
            Timestamp::ZERO,
        );
        node.handle_network_rx(Datagram::new(5, 9999, vec![1, 2, 3]), Timestamp::ZERO);
        assert_eq!(node.metrics().app_received, 1);
    }

    #[test]
    fn test_aggregation_method_switch() {
        let mut node = scripted_node(7, Tuning::default());
        node.federated_mut().set_method(AggregationMethod::Median);
        node.federated_mut().set_local_weight(0.0);
        node.handle_network_rx(policy(8, 1, vec![1.0; 8]), Timestamp::ZERO);
        node.handle_network_rx(policy(9, 1, vec![2.0; 8]), Timestamp::ZERO);
        node.run_sync(Timestamp::from_secs(1));

        // median {0.5, 1.0, 2.0}
        assert!(node.learner().values().iter().all(|&v| v == 1.0));
    }
}
