//! Collaborator traits for the schedule executor, packet log, network, time, and
//! randomness.
//!
//! These traits allow the scheduler to be used with different:
//! - Link layers (a real TSCH stack, the in-memory simulator)
//! - Network stacks carrying application and policy-sharing datagrams
//! - Time sources (hardware timers, simulated time)
//! - Random number generators

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Datagram, Destination, LinkHandle, LinkSpec, PacketRecord, SlotframeHandle};

/// Queue size for the inbound network channel.
pub const NETWORK_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Inbound datagram channel type.
pub type NetworkInChannel = Channel<ChannelMutex, Datagram, NETWORK_QUEUE_SIZE>;

/// Link-layer schedule executor.
///
/// The scheduler owns exactly one slotframe at a time. Handles returned here are
/// opaque; `None` means the executor refused (out of memory, bad parameters) and
/// the caller leaves that slot without a link.
pub trait MacSchedule {
    /// Drop every slotframe and all of their links.
    fn remove_all_slotframes(&mut self);

    /// Install a slotframe of `size` timeslots.
    fn add_slotframe(&mut self, index: u8, size: u16) -> Option<SlotframeHandle>;

    /// Install one link into `slotframe`.
    fn add_link(&mut self, slotframe: SlotframeHandle, link: &LinkSpec) -> Option<LinkHandle>;

    /// Remove a link. Returns false if the handle was unknown.
    fn remove_link(&mut self, slotframe: SlotframeHandle, link: LinkHandle) -> bool;
}

/// Link-layer packet log and buffer state.
///
/// The link layer appends one record per finished transmission or reception;
/// the cycle drains both queues once per cycle.
pub trait Transport {
    /// Packets waiting in the link-layer queue.
    fn queue_length(&self) -> usize;

    /// Take and clear the transmitted-packet log.
    fn drain_tx_records(&mut self) -> Vec<PacketRecord>;

    /// Take and clear the received-packet log.
    fn drain_rx_records(&mut self) -> Vec<PacketRecord>;

    /// Take and clear the timeslots where a collision was detected.
    ///
    /// Default implementation reports none, for link layers without collision
    /// detection.
    fn drain_collisions(&mut self) -> Vec<u16> {
        Vec::new()
    }
}

/// Datagram network used for application traffic and policy sharing.
///
/// - Network stack calls `incoming().try_send(datagram)` on receive
/// - Simulator calls `incoming().try_send(datagram)` to deliver messages
/// - Node calls `incoming().receive().await` in its run loop
pub trait Network {
    /// Send a datagram. Returns false if the stack dropped it.
    fn send(&mut self, port: u16, data: Vec<u8>, destination: Destination) -> bool;

    /// Channel for inbound datagrams.
    fn incoming(&self) -> &NetworkInChannel;
}

/// Time source trait for real or simulated time.
///
/// # Example (testing with MockClock)
///
/// ```
/// use rltsch::traits::test_impls::MockClock;
/// use rltsch::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(120));
/// assert_eq!(clock.now(), Timestamp::from_secs(120));
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait.
///
/// Used for:
/// - Value table initialization
/// - Epsilon-greedy exploration
/// - Sync jitter
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a uniform value in [0, 1).
    fn gen_unit(&mut self) -> f32 {
        // 24 bits fit the f32 mantissa exactly, so the result never rounds up to 1.0
        const SCALE: u64 = 1 << 24;
        self.gen_range(0, SCALE) as f32 / SCALE as f32
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;
    use crate::types::{LinkAddr, NodeId};

    /// Schedule executor that records every slotframe and link it is given.
    #[derive(Default)]
    pub struct MockSchedule {
        slotframe: Option<(SlotframeHandle, u16)>,
        links: Vec<(LinkHandle, LinkSpec)>,
        next_handle: u32,
        refuse: bool,
        /// Number of successful `remove_link` calls.
        pub removed: usize,
        /// Number of `remove_all_slotframes` calls.
        pub resets: usize,
    }

    impl MockSchedule {
        pub fn new() -> Self {
            Self::default()
        }

        /// Executor that refuses every slotframe and link.
        pub fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        /// Size of the installed slotframe, if any.
        pub fn slotframe_size(&self) -> Option<u16> {
            self.slotframe.map(|(_, size)| size)
        }

        /// All installed links in insertion order.
        pub fn links(&self) -> impl Iterator<Item = &LinkSpec> {
            self.links.iter().map(|(_, spec)| spec)
        }

        /// The link installed at a timeslot, if any.
        pub fn link_at(&self, timeslot: u16) -> Option<&LinkSpec> {
            self.links().find(|spec| spec.timeslot == timeslot)
        }
    }

    impl MacSchedule for MockSchedule {
        fn remove_all_slotframes(&mut self) {
            self.slotframe = None;
            self.links.clear();
            self.resets += 1;
        }

        fn add_slotframe(&mut self, _index: u8, size: u16) -> Option<SlotframeHandle> {
            if self.refuse {
                return None;
            }
            let handle = SlotframeHandle(self.next_handle as u16);
            self.next_handle += 1;
            self.slotframe = Some((handle, size));
            Some(handle)
        }

        fn add_link(&mut self, slotframe: SlotframeHandle, link: &LinkSpec) -> Option<LinkHandle> {
            match self.slotframe {
                Some((current, _)) if current == slotframe && !self.refuse => {
                    let handle = LinkHandle(self.next_handle);
                    self.next_handle += 1;
                    self.links.push((handle, *link));
                    Some(handle)
                }
                _ => None,
            }
        }

        fn remove_link(&mut self, _slotframe: SlotframeHandle, link: LinkHandle) -> bool {
            let before = self.links.len();
            self.links.retain(|(handle, _)| *handle != link);
            let removed = self.links.len() < before;
            if removed {
                self.removed += 1;
            }
            removed
        }
    }

    /// Packet log with injectable records and queue length.
    #[derive(Default)]
    pub struct MockTransport {
        queue_length: usize,
        tx: Vec<PacketRecord>,
        rx: Vec<PacketRecord>,
        collisions: Vec<u16>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_queue_length(&mut self, len: usize) {
            self.queue_length = len;
        }

        /// Log a transmission on `slot` to `peer` that took `transmissions` attempts.
        pub fn push_tx(&mut self, slot: u16, peer: NodeId, transmissions: u8) {
            let sequence = self.tx.len() as u8;
            self.tx.push(PacketRecord {
                sequence,
                transmissions,
                slot,
                channel: 0,
                peer: LinkAddr::from_node_id(peer),
            });
        }

        pub fn push_rx(&mut self, slot: u16, peer: NodeId) {
            let sequence = self.rx.len() as u8;
            self.rx.push(PacketRecord {
                sequence,
                transmissions: 1,
                slot,
                channel: 0,
                peer: LinkAddr::from_node_id(peer),
            });
        }

        pub fn push_collision(&mut self, slot: u16) {
            self.collisions.push(slot);
        }
    }

    impl Transport for MockTransport {
        fn queue_length(&self) -> usize {
            self.queue_length
        }

        fn drain_tx_records(&mut self) -> Vec<PacketRecord> {
            core::mem::take(&mut self.tx)
        }

        fn drain_rx_records(&mut self) -> Vec<PacketRecord> {
            core::mem::take(&mut self.rx)
        }

        fn drain_collisions(&mut self) -> Vec<u16> {
            core::mem::take(&mut self.collisions)
        }
    }

    /// A datagram captured by [`MockNetwork`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct SentDatagram {
        pub port: u16,
        pub data: Vec<u8>,
        pub destination: Destination,
    }

    /// Network that captures sends and lets tests inject receives.
    pub struct MockNetwork {
        sent: Vec<SentDatagram>,
        incoming: NetworkInChannel,
    }

    impl Default for MockNetwork {
        fn default() -> Self {
            Self {
                sent: Vec::new(),
                incoming: Channel::new(),
            }
        }
    }

    impl MockNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inject a datagram as if it was received (for testing).
        pub fn inject_rx(&self, datagram: Datagram) {
            let _ = self.incoming.try_send(datagram);
        }

        /// Take all sent datagrams in send order (for testing).
        pub fn take_sent(&mut self) -> Vec<SentDatagram> {
            core::mem::take(&mut self.sent)
        }
    }

    impl Network for MockNetwork {
        fn send(&mut self, port: u16, data: Vec<u8>, destination: Destination) -> bool {
            self.sent.push(SentDatagram {
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

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG; the high bits have the longest period
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + ((self.state >> 16) % range)
        }
    }

    /// Random source that replays a script of unit values, cycling when exhausted.
    ///
    /// `gen_range(min, max)` maps the next unit value `u` to `min + floor(u * (max - min))`.
    pub struct FixedRandom {
        units: Vec<f32>,
        pos: usize,
    }

    impl FixedRandom {
        pub fn new(units: &[f32]) -> Self {
            Self {
                units: units.to_vec(),
                pos: 0,
            }
        }

        fn next_unit(&mut self) -> f32 {
            if self.units.is_empty() {
                return 0.0;
            }
            let u = self.units[self.pos % self.units.len()];
            self.pos += 1;
            u
        }
    }

    impl Random for FixedRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            let span = max.saturating_sub(min);
            if span == 0 {
                return min;
            }
            let offset = (self.next_unit() as f64 * span as f64) as u64;
            min + offset.min(span - 1)
        }

        fn gen_unit(&mut self) -> f32 {
            self.next_unit()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_impls::*;
    use super::*;
    use crate::types::{LinkAddr, LinkOptions, LinkType};

    fn spec(timeslot: u16) -> LinkSpec {
        LinkSpec {
            options: LinkOptions::SHARED,
            link_type: LinkType::Normal,
            address: LinkAddr::BROADCAST,
            timeslot,
            channel_offset: 0,
        }
    }

    #[test]
    fn test_gen_unit_in_range() {
        let mut rng = MockRandom::with_seed(7);
        for _ in 0..1000 {
            let u = rng.gen_unit();
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_fixed_random_replays_script() {
        let mut rng = FixedRandom::new(&[0.0, 0.5, 0.99]);
        assert_eq!(rng.gen_unit(), 0.0);
        assert_eq!(rng.gen_range(0, 8), 4);
        assert_eq!(rng.gen_range(0, 8), 7);
        // Cycles back to the start
        assert_eq!(rng.gen_unit(), 0.0);
    }

    #[test]
    fn test_mock_schedule_tracks_links() {
        let mut mac = MockSchedule::new();
        let sf = mac.add_slotframe(0, 8).unwrap();
        let a = mac.add_link(sf, &spec(0)).unwrap();
        mac.add_link(sf, &spec(3)).unwrap();

        assert_eq!(mac.slotframe_size(), Some(8));
        assert!(mac.link_at(3).is_some());
        assert!(mac.remove_link(sf, a));
        assert!(!mac.remove_link(sf, a));
        assert_eq!(mac.removed, 1);
        assert!(mac.link_at(0).is_none());

        mac.remove_all_slotframes();
        assert_eq!(mac.links().count(), 0);
        assert_eq!(mac.slotframe_size(), None);
    }

    #[test]
    fn test_refusing_schedule_returns_none() {
        let mut mac = MockSchedule::refusing();
        assert!(mac.add_slotframe(0, 8).is_none());
        assert!(mac.add_link(SlotframeHandle(0), &spec(1)).is_none());
    }

    #[test]
    fn test_mock_transport_drains_once() {
        let mut transport = MockTransport::new();
        transport.push_tx(1, 2, 3);
        transport.push_rx(1, 2);
        transport.push_collision(4);

        assert_eq!(transport.drain_tx_records().len(), 1);
        assert_eq!(transport.drain_rx_records().len(), 1);
        assert_eq!(transport.drain_collisions(), [4]);
        assert!(transport.drain_tx_records().is_empty());
        assert!(transport.drain_collisions().is_empty());
    }

    #[test]
    fn test_mock_network_round_trip() {
        let mut net = MockNetwork::new();
        assert!(net.send(8765, alloc::vec![1, 2], Destination::Node(3)));
        let sent = net.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, Destination::Node(3));

        net.inject_rx(Datagram::new(9, 8766, alloc::vec![0]));
        let got = net.incoming().try_receive().unwrap();
        assert_eq!(got.from, 9);
    }
}
