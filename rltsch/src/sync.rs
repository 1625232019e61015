//! Policy sharing between neighbors.
//!
//! Every sync period (plus jitter) the node expires quiet neighbors, broadcasts
//! its own value table and merges the registry into it. Inbound policies are
//! validated and stored as they arrive.

use log::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::node::Node;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, MacSchedule, Network, Random, Transport};
use crate::types::{Destination, NodeId, POLICY_PORT};
use crate::wire::{Encode, PolicyMessage};

impl<M, T, N, R, Clk, Cfg> Node<M, T, N, R, Clk, Cfg>
where
    M: MacSchedule,
    T: Transport,
    N: Network,
    R: Random,
    Clk: Clock,
    Cfg: SchedulerConfig,
{
    /// Neighbors silent for longer than this are forgotten.
    pub fn neighbor_ttl(&self) -> Duration {
        self.tuning().sync_period * 2
    }

    /// Sync period plus a uniform jitter in `[0, sync_jitter]`.
    pub(crate) fn sync_delay(&mut self) -> Duration {
        let period = self.tuning().sync_period;
        let jitter_ms = self.tuning().sync_jitter.as_millis();
        let jitter = self.random_mut().gen_range(0, jitter_ms.saturating_add(1));
        period + Duration::from_millis(jitter)
    }

    /// One sync round: expire, broadcast, merge.
    pub(crate) fn run_sync(&mut self, now: Timestamp) {
        let ttl = self.neighbor_ttl();
        for node_id in self.federated_mut().cleanup_stale(ttl, now) {
            debug!("neighbor {} expired", node_id);
            emit_debug!(
                self,
                crate::debug::DebugEvent::NeighborExpired { node_id }
            );
        }

        self.broadcast_policy(now);

        let used = self.aggregate_policies();
        if used > 0 {
            self.metrics_mut().aggregations += 1;
            emit_debug!(
                self,
                crate::debug::DebugEvent::Aggregated {
                    timestamp: now,
                    neighbors: used,
                    method: self.federated().method(),
                }
            );
        }

        let stats = self.federated().stats();
        info!(
            "sync: neighbors={} used={} local_samples={} method={:?}",
            stats.active_neighbors, used, stats.local_samples, stats.method
        );
    }

    /// Broadcast the local value table.
    pub(crate) fn broadcast_policy(&mut self, now: Timestamp) {
        let msg = PolicyMessage {
            sender: self.node_id(),
            samples: self.federated().local_samples(),
            table: self.learner().snapshot(),
        };
        let (samples, table_size) = (msg.samples, msg.table.len());

        if self
            .network_mut()
            .send(POLICY_PORT, msg.encode_to_vec(), Destination::Broadcast)
        {
            self.metrics_mut().policies_sent += 1;
            debug!(
                "policy broadcast at {}s: samples={} values={}",
                now.as_secs(),
                samples,
                table_size
            );
            emit_debug!(
                self,
                crate::debug::DebugEvent::PolicyBroadcast {
                    timestamp: now,
                    samples,
                    table_size,
                }
            );
        } else {
            warn!("policy broadcast failed");
        }
    }

    /// Validate and store a neighbor's policy.
    pub(crate) fn handle_policy(&mut self, from: NodeId, data: &[u8], now: Timestamp) {
        let msg = match PolicyMessage::decode_expecting(data, self.learner().len()) {
            Ok(msg) => msg,
            Err(error) => {
                warn!(
                    "dropped policy from node {}: {:?} ({} bytes)",
                    from,
                    error,
                    data.len()
                );
                self.metrics_mut().policies_dropped += 1;
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::PolicyDecodeFailed {
                        from,
                        data_len: data.len(),
                        error,
                    }
                );
                return;
            }
        };

        if msg.sender == self.node_id() {
            self.metrics_mut().policies_dropped += 1;
            emit_debug!(
                self,
                crate::debug::DebugEvent::PolicyRejected {
                    from: msg.sender,
                    reason: "own policy",
                }
            );
            return;
        }

        self.metrics_mut().policies_received += 1;
        if self
            .federated_mut()
            .store(msg.sender, &msg.table, msg.samples, now)
        {
            emit_debug!(
                self,
                crate::debug::DebugEvent::PolicyStored {
                    from: msg.sender,
                    samples: msg.samples,
                }
            );
        } else {
            self.metrics_mut().policies_dropped += 1;
            #[allow(unused_variables)]
            let reason = if msg.table.iter().all(|v| v.is_finite()) {
                "registry full"
            } else {
                "non-finite values"
            };
            emit_debug!(
                self,
                crate::debug::DebugEvent::PolicyRejected {
                    from: msg.sender,
                    reason,
                }
            );
        }
    }
}
