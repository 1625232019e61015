//! Core types and constants shared across the scheduler.

use alloc::vec::Vec;
use core::fmt;

// Ports on the network collaborator
pub const APP_PORT: u16 = 8765;
pub const POLICY_PORT: u16 = 8766;

// Schedule layout
pub const ADVERTISING_SLOT: u16 = 0;
pub const DEFAULT_SLOTFRAME_SIZE: u16 = 8;
pub const NUM_CHANNEL_OFFSETS: u8 = 16;
pub const SLOTFRAME_INDEX: u8 = 0;

// Samples travel as a single byte on the wire
pub const MAX_SAMPLE_COUNT: u8 = u8::MAX;

/// Network-level node identifier.
pub type NodeId = u16;

/// Index into the value table; each action selects a slotframe size.
pub type ActionId = usize;

/// Link-layer (MAC) address of a peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LinkAddr(pub [u8; 8]);

impl LinkAddr {
    /// Unset address; primary-neighbor tracking treats it as "no peer".
    pub const NULL: LinkAddr = LinkAddr([0; 8]);

    /// Broadcast address used by shared and advertising links.
    pub const BROADCAST: LinkAddr = LinkAddr([0xff; 8]);

    /// Address derived from a node id (big-endian in the last two bytes).
    pub const fn from_node_id(id: NodeId) -> Self {
        let b = id.to_be_bytes();
        LinkAddr([0, 0, 0, 0, 0, 0, b[0], b[1]])
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// A real peer: neither null nor broadcast.
    pub fn is_unicast(&self) -> bool {
        !self.is_null() && *self != Self::BROADCAST
    }
}

impl fmt::Debug for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}", self.0[6], self.0[7])
    }
}

/// Configuration state of one tracked slot. Exactly one per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotConfig {
    #[default]
    Inactive,
    /// Contended TX+RX link to the broadcast address.
    Shared,
    /// Transmit-only link to one known peer.
    DedicatedTx,
    DedicatedRx,
    /// Always slot 0.
    Advertising,
}

impl SlotConfig {
    pub fn is_dedicated(self) -> bool {
        matches!(self, SlotConfig::DedicatedTx | SlotConfig::DedicatedRx)
    }
}

/// Link option flags passed to the schedule collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkOptions {
    pub tx: bool,
    pub rx: bool,
    pub shared: bool,
}

impl LinkOptions {
    /// TX | RX | SHARED, used by advertising and shared slots.
    pub const SHARED: LinkOptions = LinkOptions {
        tx: true,
        rx: true,
        shared: true,
    };

    /// TX only, used by dedicated slots.
    pub const TX_ONLY: LinkOptions = LinkOptions {
        tx: true,
        rx: false,
        shared: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Advertising,
    Normal,
}

/// Handle to a slotframe installed in the schedule collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotframeHandle(pub u16);

/// Handle to a link installed in the schedule collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub u32);

/// Everything needed to (re)install one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub options: LinkOptions,
    pub link_type: LinkType,
    pub address: LinkAddr,
    pub timeslot: u16,
    pub channel_offset: u8,
}

/// One transmitted or received packet, as logged by the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRecord {
    pub sequence: u8,
    /// Attempts needed; 1 means delivered without retransmission.
    pub transmissions: u8,
    pub slot: u16,
    pub channel: u8,
    pub peer: LinkAddr,
}

/// How neighbor value tables are merged into the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregationMethod {
    #[default]
    FedAvg,
    Median,
    /// Weighted by each contributor's sample count.
    Weighted,
}

/// Destination of an outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Broadcast,
    Node(NodeId),
}

/// Datagram delivered by the network collaborator.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: NodeId,
    pub port: u16,
    pub data: Vec<u8>,
}

impl Datagram {
    pub fn new(from: NodeId, port: u16, data: Vec<u8>) -> Self {
        Self { from, port, data }
    }
}

/// Counters for monitoring a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMetrics {
    pub cycles_completed: u32,
    pub reconfigurations: u32,
    pub app_sent: u32,
    pub app_received: u32,
    pub policies_sent: u32,
    pub policies_received: u32,
    pub policies_dropped: u32,
    pub aggregations: u32,
}
