//! Neighbor policy registry and federated merge.
//!
//! Each neighbor's last broadcast value table is kept until it goes stale. On
//! every sync round the registry is merged into the local table with one of three
//! methods: plain averaging, per-index median, or sample-weighted averaging.

use alloc::vec::Vec;

use log::{debug, info, warn};

use crate::config::Tuning;
use crate::time::{Duration, Timestamp};
use crate::types::{AggregationMethod, NodeId, MAX_SAMPLE_COUNT};

/// Last known policy of one neighbor.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighborEntry {
    pub node_id: NodeId,
    pub table: Vec<f32>,
    /// Sample count the neighbor reported with this table.
    pub samples: u8,
    pub last_seen: Timestamp,
}

/// Snapshot returned by [`FederatedAggregator::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FederatedStats {
    pub active_neighbors: usize,
    pub local_samples: u8,
    pub method: AggregationMethod,
}

/// Bounded neighbor registry plus the merge policy.
#[derive(Clone, Debug)]
pub struct FederatedAggregator {
    neighbors: Vec<NeighborEntry>,
    capacity: usize,
    table_size: usize,
    local_samples: u8,
    method: AggregationMethod,
    /// Blend weight kept by the local value in FedAvg and Median.
    local_weight: f32,
    enabled: bool,
}

impl FederatedAggregator {
    /// Empty registry for up to `capacity` neighbors with tables of `table_size`.
    pub fn new(capacity: usize, table_size: usize, tuning: &Tuning) -> Self {
        info!(
            "federated aggregation: method={:?} local_weight={}",
            tuning.aggregation, tuning.local_weight
        );
        Self {
            neighbors: Vec::with_capacity(capacity),
            capacity,
            table_size,
            local_samples: 0,
            method: tuning.aggregation,
            local_weight: tuning.local_weight.clamp(0.0, 1.0),
            enabled: tuning.federation_enabled,
        }
    }

    pub fn neighbors(&self) -> &[NeighborEntry] {
        &self.neighbors
    }

    pub fn neighbor(&self, node_id: NodeId) -> Option<&NeighborEntry> {
        self.neighbors.iter().find(|n| n.node_id == node_id)
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_full(&self) -> bool {
        self.neighbors.len() >= self.capacity
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    pub fn set_method(&mut self, method: AggregationMethod) {
        self.method = method;
        info!("aggregation method set to {:?}", method);
    }

    pub fn local_weight(&self) -> f32 {
        self.local_weight
    }

    /// Set the blend weight, clamped to [0, 1].
    pub fn set_local_weight(&mut self, weight: f32) {
        self.local_weight = if weight.is_nan() {
            0.0
        } else {
            weight.clamp(0.0, 1.0)
        };
        info!("local model weight set to {}", self.local_weight);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn local_samples(&self) -> u8 {
        self.local_samples
    }

    /// Count one completed learning cycle. Saturates at 255.
    pub fn record_local_sample(&mut self) {
        if self.local_samples < MAX_SAMPLE_COUNT {
            self.local_samples += 1;
        }
    }

    pub fn stats(&self) -> FederatedStats {
        FederatedStats {
            active_neighbors: self.neighbors.len(),
            local_samples: self.local_samples,
            method: self.method,
        }
    }

    /// Store or refresh a neighbor's table.
    ///
    /// A known neighbor is updated in place. A new one takes a free entry; when
    /// the registry is full nobody is evicted and false is returned. Tables of
    /// the wrong length or holding NaN/infinite values are rejected.
    pub fn store(&mut self, node_id: NodeId, table: &[f32], samples: u8, now: Timestamp) -> bool {
        if table.is_empty() || table.len() != self.table_size {
            warn!(
                "rejected table from node {}: {} values, expected {}",
                node_id,
                table.len(),
                self.table_size
            );
            return false;
        }
        if !table.iter().all(|v| v.is_finite()) {
            warn!("rejected table from node {}: non-finite values", node_id);
            return false;
        }

        if let Some(entry) = self.neighbors.iter_mut().find(|n| n.node_id == node_id) {
            entry.table.clear();
            entry.table.extend_from_slice(table);
            entry.samples = samples;
            entry.last_seen = now;
            debug!("updated table from node {} (samples={})", node_id, samples);
            return true;
        }

        if self.is_full() {
            warn!("no room for table from node {} (registry full)", node_id);
            return false;
        }

        self.neighbors.push(NeighborEntry {
            node_id,
            table: table.to_vec(),
            samples,
            last_seen: now,
        });
        info!(
            "added table from node {} (samples={}, neighbors={})",
            node_id,
            samples,
            self.neighbors.len()
        );
        true
    }

    /// Forget neighbors not heard from for strictly more than `ttl`.
    ///
    /// Returns the ids removed.
    pub fn cleanup_stale(&mut self, ttl: Duration, now: Timestamp) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.neighbors.retain(|n| {
            let fresh = now.saturating_sub(n.last_seen) <= ttl;
            if !fresh {
                removed.push(n.node_id);
            }
            fresh
        });
        if !removed.is_empty() {
            info!("removed {} stale neighbors", removed.len());
        }
        removed
    }

    /// Merge the registry into `local` using the configured method.
    ///
    /// Returns the number of neighbors that contributed; 0 leaves `local`
    /// untouched.
    pub fn aggregate(&self, local: &mut [f32]) -> usize {
        if !self.enabled {
            return 0;
        }
        if self.neighbors.is_empty() {
            info!("no neighbors to aggregate with");
            return 0;
        }
        if local.len() != self.table_size {
            warn!(
                "local table has {} values, expected {}",
                local.len(),
                self.table_size
            );
            return 0;
        }

        match self.method {
            AggregationMethod::FedAvg => self.fedavg(local),
            AggregationMethod::Median => self.median(local),
            AggregationMethod::Weighted => self.weighted(local),
        }
    }

    fn fedavg(&self, local: &mut [f32]) -> usize {
        let count = (self.neighbors.len() + 1) as f32;
        for (i, value) in local.iter_mut().enumerate() {
            let sum: f32 = self.neighbors.iter().map(|n| n.table[i]).sum();
            let avg = (*value + sum) / count;
            *value = self.blend(*value, avg);
        }
        info!("fedavg: aggregated {} neighbors", self.neighbors.len());
        self.neighbors.len()
    }

    fn median(&self, local: &mut [f32]) -> usize {
        let mut column = Vec::with_capacity(self.neighbors.len() + 1);
        for (i, value) in local.iter_mut().enumerate() {
            column.clear();
            column.push(*value);
            column.extend(self.neighbors.iter().map(|n| n.table[i]));
            let median = median_of(&mut column);
            *value = self.blend(*value, median);
        }
        info!("median: aggregated {} neighbors", self.neighbors.len());
        self.neighbors.len()
    }

    fn weighted(&self, local: &mut [f32]) -> usize {
        let total: u32 = self.local_samples as u32
            + self.neighbors.iter().map(|n| n.samples as u32).sum::<u32>();
        if total == 0 {
            warn!("total samples is 0, falling back to fedavg");
            return self.fedavg(local);
        }

        let total = total as f32;
        let local_share = self.local_samples as f32 / total;
        for (i, value) in local.iter_mut().enumerate() {
            let mut merged = local_share * *value;
            for n in &self.neighbors {
                merged += (n.samples as f32 / total) * n.table[i];
            }
            *value = merged;
        }
        info!(
            "weighted: local_share={} neighbors={}",
            local_share,
            self.neighbors.len()
        );
        self.neighbors.len()
    }

    fn blend(&self, local: f32, merged: f32) -> f32 {
        self.local_weight * local + (1.0 - self.local_weight) * merged
    }
}

/// Median of a non-empty column; even counts average the two middle values.
fn median_of(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
