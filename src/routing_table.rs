// Copyright (c) 2025 Saorsa Labs Limited

// This file is part of the Saorsa P2P network.

// Licensed under the AGPL-3.0 license:
// <https://www.gnu.org/licenses/agpl-3.0.html>

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Kademlia routing table: 160 XOR-distance k-buckets plus the local node id.
//!
//! Each bucket keeps nodes ordered by recency (most recently updated at the
//! tail) and enforces the "LRU replacement with liveness preference"
//! insertion policy from spec.md §4.1.

use crate::node::{Node, NodeId, ID_BITS};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// A single k-bucket: an ordered (by recency) list of nodes, tail-most
/// recent, capped at `capacity`.
#[derive(Debug)]
struct KBucket {
    entries: VecDeque<Node>,
    capacity: usize,
    last_refresh_ms: u64,
}

impl KBucket {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            last_refresh_ms: now_ms(),
        }
    }

    /// Apply the insertion policy from spec.md §4.1. Returns `true` if the
    /// node ends up (newly or still) present at the tail.
    fn insert(&mut self, node: Node) -> bool {
        if let Some(pos) = self.entries.iter().position(|n| n.node_id == node.node_id) {
            self.entries.remove(pos);
            self.entries.push_back(node);
            return true;
        }

        if self.entries.len() < self.capacity {
            self.entries.push_back(node);
            return true;
        }

        // Full: inspect the least-recently-updated (head) entry.
        if let Some(head) = self.entries.front() {
            if !head.alive {
                self.entries.pop_front();
                self.entries.push_back(node);
                return true;
            }
        }
        false
    }

    fn remove(&mut self, node_id: &NodeId) -> bool {
        if let Some(pos) = self.entries.iter().position(|n| n.node_id == *node_id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    fn update_last_seen(&mut self, node_id: &NodeId) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|n| n.node_id == *node_id) {
            entry.touch();
            true
        } else {
            false
        }
    }

    fn needs_refresh(&self, max_age: Duration) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let oldest = self
            .entries
            .iter()
            .map(|n| n.last_seen_ms)
            .min()
            .unwrap_or(0);
        now_ms().saturating_sub(oldest) > max_age.as_millis() as u64
    }
}

/// Kademlia routing table for a single local node.
///
/// All mutating operations take an exclusive guard on the owning bucket;
/// read-only operations (`closest`, `all_nodes`) observe a consistent
/// per-bucket snapshot by taking a shared guard per bucket in turn.
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<Arc<RwLock<KBucket>>>,
    capacity: usize,
}

impl RoutingTable {
    /// Build an empty table for `local_id` with per-bucket capacity `k`.
    pub fn new(local_id: NodeId, k: usize) -> Self {
        let buckets = (0..ID_BITS)
            .map(|_| Arc::new(RwLock::new(KBucket::new(k))))
            .collect();
        Self {
            local_id,
            buckets,
            capacity: k,
        }
    }

    fn bucket_index_for(&self, node_id: &NodeId) -> Option<usize> {
        let distance = self.local_id.distance(node_id);
        if distance.is_zero() {
            None
        } else {
            Some(distance.bucket_index())
        }
    }

    /// Insert or refresh `node`. Returns `false` if the local node id was
    /// given (refused, never stored) or the owning bucket is full of live
    /// entries.
    #[instrument(skip(self, node), fields(node_id = %node.node_id))]
    pub async fn add(&self, node: Node) -> bool {
        let Some(index) = self.bucket_index_for(&node.node_id) else {
            warn!("refusing to add local node id to routing table");
            return false;
        };
        let mut bucket = self.buckets[index].write().await;
        let inserted = bucket.insert(node);
        if inserted {
            debug!(bucket = index, "node added to routing table");
        }
        inserted
    }

    /// Remove a node by id. Returns `true` if it was present.
    pub async fn remove(&self, node_id: &NodeId) -> bool {
        let Some(index) = self.bucket_index_for(node_id) else {
            return false;
        };
        let mut bucket = self.buckets[index].write().await;
        bucket.remove(node_id)
    }

    /// Touch `last_seen` for a known node without changing its position
    /// relative to the eviction policy beyond what insertion ordering
    /// already implies; callers that want the recency move should use
    /// [`RoutingTable::add`] with a re-observed `Node` instead.
    pub async fn update_last_seen(&self, node_id: &NodeId) -> bool {
        let Some(index) = self.bucket_index_for(node_id) else {
            return false;
        };
        let mut bucket = self.buckets[index].write().await;
        bucket.update_last_seen(node_id)
    }

    /// The `count` nodes closest to `key`, ascending by XOR distance, ties
    /// broken by node-id byte-lexicographic order.
    pub async fn closest(&self, key: &NodeId, count: usize) -> Vec<Node> {
        let mut all = self.all_nodes().await;
        all.sort_by(|a, b| {
            let da = key.distance(&a.node_id);
            let db = key.distance(&b.node_id);
            da.cmp(&db).then_with(|| a.node_id.cmp(&b.node_id))
        });
        all.truncate(count);
        all
    }

    /// Snapshot of every node currently in the table.
    pub async fn all_nodes(&self) -> Vec<Node> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            let guard = bucket.read().await;
            out.extend(guard.entries.iter().cloned());
        }
        out
    }

    /// Total number of nodes across all buckets.
    pub async fn size(&self) -> usize {
        let mut total = 0;
        for bucket in &self.buckets {
            total += bucket.read().await.entries.len();
        }
        total
    }

    /// Number of buckets holding at least one node.
    pub async fn bucket_count_nonempty(&self) -> usize {
        let mut count = 0;
        for bucket in &self.buckets {
            if !bucket.read().await.entries.is_empty() {
                count += 1;
            }
        }
        count
    }

    /// Indices of buckets whose oldest entry is older than `max_age`.
    /// Empty buckets are never due for refresh.
    pub async fn buckets_needing_refresh(&self, max_age: Duration) -> Vec<usize> {
        let mut out = Vec::new();
        for (i, bucket) in self.buckets.iter().enumerate() {
            if bucket.read().await.needs_refresh(max_age) {
                out.push(i);
            }
        }
        out
    }

    /// Mark a bucket as freshly refreshed (called after a successful
    /// `refresh_buckets()` lookup for that index).
    pub async fn mark_refreshed(&self, index: usize) {
        if let Some(bucket) = self.buckets.get(index) {
            bucket.write().await.last_refresh_ms = now_ms();
        }
    }

    /// Local node id this table is routing for.
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Per-bucket capacity, `k`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
