//! SimNode wrapper and in-memory collaborators for simulated rltsch nodes.

use std::cell::Cell;
use std::collections::VecDeque;
use std::future::{ready, Ready};

use rltsch::config::DefaultConfig;
use rltsch::traits::{Clock, MacSchedule, Network, NetworkInChannel, Random, Transport};
use rltsch::{
    Datagram, Destination, LinkAddr, LinkHandle, LinkSpec, Node, NodeId, PacketRecord,
    SlotframeHandle, Timestamp, Tuning,
};
use embassy_sync::channel::Channel;

/// Packets a node's link-layer queue holds before it drops new ones.
pub const SIM_QUEUE_CAPACITY: usize = 32;

/// In-memory schedule executor.
///
/// Holds the one slotframe the scheduler installs and the links in it. The
/// simulator reads it back to decide which timeslots a node transmits and
/// listens on.
#[derive(Debug, Default)]
pub struct SimSchedule {
    slotframe: Option<(SlotframeHandle, u16)>,
    links: Vec<(LinkHandle, LinkSpec)>,
    next_handle: u32,
}

impl SimSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slotframe_size(&self) -> Option<u16> {
        self.slotframe.map(|(_, size)| size)
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkSpec> {
        self.links.iter().map(|(_, spec)| spec)
    }

    /// Transmit-capable links that can reach `peer`: shared broadcast links
    /// and links dedicated to that peer.
    pub fn tx_links_to(&self, peer: LinkAddr) -> Vec<LinkSpec> {
        self.links()
            .filter(|spec| spec.options.tx)
            .filter(|spec| spec.address == LinkAddr::BROADCAST || spec.address == peer)
            .copied()
            .collect()
    }

    pub fn transmits_on(&self, timeslot: u16) -> bool {
        self.links()
            .any(|spec| spec.timeslot == timeslot && spec.options.tx)
    }

    pub fn listens_on(&self, timeslot: u16) -> bool {
        self.links()
            .any(|spec| spec.timeslot == timeslot && spec.options.rx)
    }
}

impl MacSchedule for SimSchedule {
    fn remove_all_slotframes(&mut self) {
        self.slotframe = None;
        self.links.clear();
    }

    fn add_slotframe(&mut self, _index: u8, size: u16) -> Option<SlotframeHandle> {
        if size == 0 {
            return None;
        }
        let handle = SlotframeHandle(self.next_handle as u16);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.slotframe = Some((handle, size));
        Some(handle)
    }

    fn add_link(&mut self, slotframe: SlotframeHandle, link: &LinkSpec) -> Option<LinkHandle> {
        let (current, size) = self.slotframe?;
        if current != slotframe || link.timeslot >= size {
            return None;
        }
        let handle = LinkHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.links.push((handle, *link));
        Some(handle)
    }

    fn remove_link(&mut self, _slotframe: SlotframeHandle, link: LinkHandle) -> bool {
        let before = self.links.len();
        self.links.retain(|(handle, _)| *handle != link);
        self.links.len() < before
    }
}

/// A unicast datagram waiting in the link-layer queue.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub to: NodeId,
    pub datagram: Datagram,
}

/// In-memory link layer: a bounded packet queue plus the tx/rx/collision logs
/// the scheduler drains every cycle.
#[derive(Debug, Default)]
pub struct SimTransport {
    queue: VecDeque<PendingPacket>,
    tx: Vec<PacketRecord>,
    rx: Vec<PacketRecord>,
    collisions: Vec<u16>,
    next_sequence: u8,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet. Returns false, dropping it, if the queue is full.
    pub fn enqueue(&mut self, packet: PendingPacket) -> bool {
        if self.queue.len() >= SIM_QUEUE_CAPACITY {
            return false;
        }
        self.queue.push_back(packet);
        true
    }

    pub fn front(&self) -> Option<&PendingPacket> {
        self.queue.front()
    }

    pub fn pop_front(&mut self) -> Option<PendingPacket> {
        self.queue.pop_front()
    }

    /// Log a delivered transmission that took `transmissions` attempts.
    pub fn log_tx(&mut self, slot: u16, channel: u8, peer: LinkAddr, transmissions: u8) {
        let sequence = self.next_sequence();
        self.tx.push(PacketRecord {
            sequence,
            transmissions,
            slot,
            channel,
            peer,
        });
    }

    pub fn log_rx(&mut self, slot: u16, channel: u8, peer: LinkAddr) {
        let sequence = self.next_sequence();
        self.rx.push(PacketRecord {
            sequence,
            transmissions: 1,
            slot,
            channel,
            peer,
        });
    }

    pub fn log_collision(&mut self, slot: u16) {
        self.collisions.push(slot);
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }
}

impl Transport for SimTransport {
    fn queue_length(&self) -> usize {
        self.queue.len()
    }

    fn drain_tx_records(&mut self) -> Vec<PacketRecord> {
        std::mem::take(&mut self.tx)
    }

    fn drain_rx_records(&mut self) -> Vec<PacketRecord> {
        std::mem::take(&mut self.rx)
    }

    fn drain_collisions(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.collisions)
    }
}

/// A datagram handed to the network by the node.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub port: u16,
    pub data: Vec<u8>,
    pub destination: Destination,
}

/// In-memory network: sends land in an outbox the simulator routes.
pub struct SimNetwork {
    outbox: Vec<Outgoing>,
    incoming: NetworkInChannel,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            outbox: Vec::new(),
            incoming: Channel::new(),
        }
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Network for SimNetwork {
    fn send(&mut self, port: u16, data: Vec<u8>, destination: Destination) -> bool {
        self.outbox.push(Outgoing {
            port,
            data,
            destination,
        });
        true
    }

    fn incoming(&self) -> &NetworkInChannel {
        &self.incoming
    }
}

/// Clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic LCG.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        min + ((self.state >> 16) % range)
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimSchedule, SimTransport, SimNetwork, SimRandom, SimClock, DefaultConfig>;

/// Wrapper around an rltsch Node for simulation.
pub struct SimNode {
    inner: SimNodeInner,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Create a node whose random stream is seeded by `seed`.
    pub fn new(node_id: NodeId, seed: u64, tuning: Tuning, created_at: Timestamp) -> Self {
        let inner = Node::new(
            node_id,
            SimSchedule::new(),
            SimTransport::new(),
            SimNetwork::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
            tuning,
        );
        Self { inner, created_at }
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    /// Install the initial schedule and arm the node's timers.
    pub fn initialize(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.initialize(now);
    }

    /// Handle timer events.
    pub fn handle_timer(&mut self, now: Timestamp) {
        // Keep clock.now() in step for code that reads it
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
    }

    /// Hand an inbound datagram to the node.
    pub fn handle_datagram(&mut self, datagram: Datagram, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_network_rx(datagram, now);
    }

    pub fn next_wake(&self) -> Option<Timestamp> {
        self.inner.next_wake()
    }

    /// Take everything the node sent since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.inner.network_mut().take_outbox()
    }

    pub fn mac(&self) -> &SimSchedule {
        self.inner.schedule().mac()
    }

    pub fn transport(&self) -> &SimTransport {
        self.inner.transport()
    }

    pub fn transport_mut(&mut self) -> &mut SimTransport {
        self.inner.transport_mut()
    }

    pub fn values(&self) -> &[f32] {
        self.inner.learner().values()
    }

    pub fn epsilon(&self) -> f32 {
        self.inner.learner().epsilon()
    }

    pub fn slotframe_size(&self) -> u16 {
        self.inner.schedule().size()
    }

    pub fn neighbor_count(&self) -> usize {
        self.inner.federated().neighbor_count()
    }

    /// Take all debug events from the node's debug channel.
    pub fn take_debug_events(&self) -> Vec<rltsch::debug::DebugEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.debug_channel().try_receive() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use rltsch::debug::DebugEvent;
    use rltsch::{Duration, LinkOptions, LinkType, POLICY_PORT};

    use super::*;

    fn spec(timeslot: u16, options: LinkOptions, address: LinkAddr) -> LinkSpec {
        LinkSpec {
            options,
            link_type: LinkType::Normal,
            address,
            timeslot,
            channel_offset: 0,
        }
    }

    #[test]
    fn test_schedule_link_queries() {
        let mut mac = SimSchedule::new();
        let sf = mac.add_slotframe(0, 4).unwrap();
        mac.add_link(sf, &spec(0, LinkOptions::SHARED, LinkAddr::BROADCAST))
            .unwrap();
        mac.add_link(sf, &spec(2, LinkOptions::TX_ONLY, LinkAddr::from_node_id(9)))
            .unwrap();
        // Outside the slotframe
        assert!(mac
            .add_link(sf, &spec(4, LinkOptions::SHARED, LinkAddr::BROADCAST))
            .is_none());

        assert_eq!(mac.tx_links_to(LinkAddr::from_node_id(9)).len(), 2);
        assert_eq!(mac.tx_links_to(LinkAddr::from_node_id(5)).len(), 1);
        assert!(mac.transmits_on(2));
        assert!(!mac.listens_on(2));
        assert!(mac.listens_on(0));
        assert!(!mac.transmits_on(1));
    }

    #[test]
    fn test_transport_queue_bounded() {
        let mut transport = SimTransport::new();
        let packet = PendingPacket {
            to: 1,
            datagram: Datagram::new(2, 8765, vec![0; 4]),
        };
        for _ in 0..SIM_QUEUE_CAPACITY {
            assert!(transport.enqueue(packet.clone()));
        }
        assert!(!transport.enqueue(packet));
        assert_eq!(transport.queue_length(), SIM_QUEUE_CAPACITY);

        transport.log_tx(3, 1, LinkAddr::from_node_id(1), 2);
        transport.log_rx(3, 1, LinkAddr::from_node_id(1));
        let tx = transport.drain_tx_records();
        assert_eq!(tx[0].transmissions, 2);
        assert_eq!(transport.drain_rx_records()[0].sequence, 1);
        assert!(transport.drain_tx_records().is_empty());
    }

    #[test]
    fn test_simnode_initialize_installs_schedule() {
        let mut node = SimNode::new(4, 42, Tuning::default(), Timestamp::ZERO);
        node.initialize(Timestamp::ZERO);

        assert_eq!(node.node_id(), 4);
        assert_eq!(node.mac().slotframe_size(), Some(8));
        assert_eq!(node.mac().links().count(), 8);
        assert_eq!(node.next_wake(), Some(Timestamp::from_secs(120)));
    }

    #[test]
    fn test_simnode_seed_drives_initial_table() {
        let a = SimNode::new(1, 42, Tuning::default(), Timestamp::ZERO);
        let b = SimNode::new(2, 42, Tuning::default(), Timestamp::ZERO);
        let c = SimNode::new(3, 43, Tuning::default(), Timestamp::ZERO);
        assert_eq!(a.values(), b.values());
        assert_ne!(a.values(), c.values());
    }

    #[test]
    fn test_simnode_sync_sends_policy() {
        let mut node = SimNode::new(4, 42, Tuning::default(), Timestamp::ZERO);
        node.initialize(Timestamp::ZERO);

        let sync = node.inner().next_sync().unwrap();
        node.handle_timer(Timestamp::from_secs(120));
        node.handle_timer(sync);
        assert_eq!(node.inner().now(), sync);

        let sent = node.take_outgoing();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].port, POLICY_PORT);
        assert_eq!(sent[0].destination, Destination::Broadcast);
        assert!(node
            .take_debug_events()
            .iter()
            .any(|e| matches!(e, DebugEvent::PolicyBroadcast { .. })));
    }

    #[test]
    fn test_simnode_queue_feeds_buffer_reading() {
        let tuning = Tuning::default().with_app_traffic(Some(1), Duration::from_secs(60));
        let mut node = SimNode::new(4, 42, tuning, Timestamp::ZERO);
        node.initialize(Timestamp::ZERO);
        node.transport_mut().enqueue(PendingPacket {
            to: 1,
            datagram: Datagram::new(4, 8765, vec![0; 8]),
        });

        node.handle_timer(Timestamp::from_secs(120));
        let rltsch::cycle::Phase::Observing(state) = node.inner().phase() else {
            panic!("expected an observing cycle");
        };
        assert_eq!(state.buffer_before, 1);
    }
}
