//! Debug events for protocol tracing.
//!
//! Enabled in test builds and with the `debug` feature. The node pushes events
//! into a bounded channel that the simulator drains; when the channel is full
//! events are dropped.

use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::traits::ChannelMutex;
use crate::types::{ActionId, AggregationMethod, LinkAddr, NodeId};
use crate::wire::DecodeError;

/// Capacity of a node's debug channel.
pub const DEBUG_QUEUE_SIZE: usize = 64;

/// Channel the node emits [`DebugEvent`]s into.
pub type DebugChannel = Channel<ChannelMutex, DebugEvent, DEBUG_QUEUE_SIZE>;

/// Push an event into the node's debug channel. Compiled out without the
/// `debug` feature.
#[cfg(any(test, feature = "debug"))]
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {
        $node.emit_debug_event($event)
    };
}

#[cfg(not(any(test, feature = "debug")))]
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {};
}

/// Debug events emitted by the node for protocol tracing.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    /// A cycle chose its action and installed the matching slotframe.
    CycleStarted {
        timestamp: Timestamp,
        action: ActionId,
        best_action: ActionId,
        slotframe_size: u16,
        epsilon: f32,
    },
    /// A cycle was scored and the value table updated.
    CycleCompleted {
        timestamp: Timestamp,
        action: ActionId,
        tx: u32,
        rx: u32,
        slot_reward: f32,
        bonus: f32,
        reward: f32,
    },
    /// Reconfiguration switched an idle slot off.
    SlotDeactivated { slot: u16, usage: u16 },
    /// Reconfiguration gave a busy slot a dedicated link.
    SlotPromoted { slot: u16, peer: LinkAddr },
    /// Reconfiguration moved a colliding slot to another channel offset.
    ChannelRetuned { slot: u16, from: u8, to: u8 },
    /// Local policy broadcast.
    PolicyBroadcast {
        timestamp: Timestamp,
        samples: u8,
        table_size: usize,
    },
    /// Neighbor policy accepted into the registry.
    PolicyStored { from: NodeId, samples: u8 },
    /// Neighbor policy decoded but not stored.
    PolicyRejected { from: NodeId, reason: &'static str },
    /// Neighbor policy failed to decode.
    PolicyDecodeFailed {
        from: NodeId,
        data_len: usize,
        error: DecodeError,
    },
    /// Registry merged into the local table.
    Aggregated {
        timestamp: Timestamp,
        neighbors: usize,
        method: AggregationMethod,
    },
    /// Neighbor dropped from the registry for going quiet.
    NeighborExpired { node_id: NodeId },
}
