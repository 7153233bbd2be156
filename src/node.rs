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

//! 160-bit node identifiers and the XOR distance metric.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Number of bits in a [`NodeId`], and the number of buckets in a
/// [`crate::routing_table::RoutingTable`].
pub const ID_BITS: usize = 160;
const ID_BYTES: usize = ID_BITS / 8;

/// Opaque 160-bit identifier for a DHT participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId([u8; ID_BYTES]);

impl NodeId {
    /// Build a `NodeId` from raw bytes.
    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Derive a `NodeId` from a BLAKE3 hash, truncated to 160 bits. Used to
    /// build synthetic targets for bucket refresh and key-to-node mapping.
    pub fn from_hash(hash: blake3::Hash) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&hash.as_bytes()[..ID_BYTES]);
        Self(bytes)
    }

    /// Generate a cryptographically random `NodeId`.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        getrandom::getrandom(&mut bytes).expect("system RNG must be available");
        Self(bytes)
    }

    /// Generate a random `NodeId` that falls inside a given routing-table
    /// bucket, i.e. whose distance to `local` has `bucket_index() == index`.
    /// Used by `refresh_buckets` to pick a lookup target for a stale bucket.
    pub fn random_in_bucket(local: &NodeId, index: usize) -> Self {
        debug_assert!(index < ID_BITS);
        let mut bytes = local.0;
        let byte_index = index / 8;
        let bit_in_byte = 7 - (index % 8);
        // Flip the bit that defines this bucket, then randomize everything
        // less significant so the result lands in the bucket but is
        // otherwise unpredictable.
        bytes[byte_index] ^= 1 << bit_in_byte;
        let mut rng_tail = vec![0u8; ID_BYTES - byte_index - 1];
        if !rng_tail.is_empty() {
            getrandom::getrandom(&mut rng_tail).expect("system RNG must be available");
            bytes[byte_index + 1..].copy_from_slice(&rng_tail);
        }
        if bit_in_byte > 0 {
            let mask: u8 = (1 << bit_in_byte) - 1;
            let mut low_bits = [0u8; 1];
            getrandom::getrandom(&mut low_bits).expect("system RNG must be available");
            bytes[byte_index] = (bytes[byte_index] & !mask) | (low_bits[0] & mask);
        }
        Self(bytes)
    }

    /// XOR distance to another `NodeId`.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_BYTES];
        for i in 0..ID_BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Raw byte representation.
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Hex string for logging and display.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    /// Byte-lexicographic order, used to break distance ties deterministically.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// The XOR distance between two [`NodeId`]s, a 160-bit unsigned magnitude.
///
/// Satisfies `distance(a, a) == 0`, `distance(a, b) == distance(b, a)`, and
/// the XOR triangle inequality `distance(a, b) <= distance(a, c) ^ distance(c, b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; ID_BYTES]);

impl Distance {
    /// Zero distance (only `distance(a, a)` produces this).
    pub fn zero() -> Self {
        Self([0u8; ID_BYTES])
    }

    /// True if this is the zero distance.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Index (0-based, from the most significant bit) of the first set bit.
    /// Returns `ID_BITS` if the distance is zero.
    pub fn leading_zeros(&self) -> u32 {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return (i * 8) as u32 + byte.leading_zeros();
            }
        }
        ID_BITS as u32
    }

    /// Routing-table bucket index for this distance, clamped into
    /// `[0, ID_BITS - 1]`. A zero distance (the local node) maps to the
    /// highest bucket index; callers must refuse to store it — see
    /// [`crate::routing_table::RoutingTable::add`].
    pub fn bucket_index(&self) -> usize {
        let zeros = self.leading_zeros() as usize;
        if zeros >= ID_BITS {
            ID_BITS - 1
        } else {
            ID_BITS - 1 - zeros
        }
    }
}

/// DHT-level view of a participant: address, liveness, and recency.
///
/// Created the first time a node is observed (via an inbound message or a
/// lookup response); mutated only through [`Node::touch`] and
/// [`Node::set_alive`]; destroyed on bucket eviction or explicit removal.
/// Equality is by `node_id` alone, matching spec.md's data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Stable identifier.
    pub node_id: NodeId,
    /// Network endpoint.
    pub address: SocketAddr,
    /// Millisecond Unix timestamp of the last successful interaction.
    pub last_seen_ms: u64,
    /// Whether the node is currently believed reachable.
    pub alive: bool,
    /// Exponential moving average round-trip time, in milliseconds.
    /// Supplemental to spec.md's Node fields (see SPEC_FULL.md §6) — used
    /// only to order refresh candidates, never to decide bucket capacity.
    pub rtt_ms: u32,
    /// Successes / (successes + failures), updated by
    /// [`Node::record_success`] / [`Node::record_failure`].
    pub reliability: f64,
    successes: u32,
    failures: u32,
}

impl Node {
    /// Create a freshly observed node, alive by default.
    pub fn new(node_id: NodeId, address: SocketAddr) -> Self {
        Self {
            node_id,
            address,
            last_seen_ms: now_ms(),
            alive: true,
            rtt_ms: 100,
            reliability: 1.0,
            successes: 0,
            failures: 0,
        }
    }

    /// Refresh `last_seen_ms` to now.
    pub fn touch(&mut self) {
        self.last_seen_ms = now_ms();
    }

    /// Mark the node alive or not, without touching `last_seen_ms`.
    pub fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    /// Record a successful round-trip, updating RTT and reliability.
    pub fn record_success(&mut self, rtt_ms: u32) {
        self.touch();
        self.alive = true;
        self.successes += 1;
        self.rtt_ms = ((self.rtt_ms as u64 * 3 + rtt_ms as u64) / 4) as u32;
        self.recompute_reliability();
    }

    /// Record a failed round-trip, updating reliability only.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.recompute_reliability();
    }

    fn recompute_reliability(&mut self) {
        let total = self.successes + self.failures;
        if total > 0 {
            self.reliability = self.successes as f64 / total as f64;
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.node_id == other.node_id
    }
}
impl Eq for Node {}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distance_is_symmetric_and_zero_for_self() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.distance(&a), Distance::zero());
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    proptest! {
        // spec.md §8: distance(a,a)=0, distance(a,b)=distance(b,a),
        // distance(a,b) <= distance(a,c) XOR distance(c,b).
        #[test]
        fn prop_xor_metric_invariants(
            a in prop::array::uniform20(any::<u8>()),
            b in prop::array::uniform20(any::<u8>()),
            c in prop::array::uniform20(any::<u8>()),
        ) {
            let a = NodeId::from_bytes(a);
            let b = NodeId::from_bytes(b);
            let c = NodeId::from_bytes(c);

            prop_assert_eq!(a.distance(&a), Distance::zero());
            prop_assert_eq!(a.distance(&b), b.distance(&a));

            let ab = a.distance(&b);
            let ac = a.distance(&c);
            let cb = c.distance(&b);
            let mut xored = [0u8; ID_BYTES];
            for i in 0..ID_BYTES {
                xored[i] = ac.0[i] ^ cb.0[i];
            }
            prop_assert!(ab <= Distance(xored));
        }
    }

    #[test]
    fn bucket_index_is_msb_position() {
        let mut bytes = [0u8; ID_BYTES];
        bytes[0] = 0b1000_0000;
        assert_eq!(Distance(bytes).bucket_index(), ID_BITS - 1);

        bytes[0] = 0b0100_0000;
        assert_eq!(Distance(bytes).bucket_index(), ID_BITS - 2);

        bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 1] = 1;
        assert_eq!(Distance(bytes).bucket_index(), 0);
    }

    #[test]
    fn random_in_bucket_lands_in_requested_bucket() {
        let local = NodeId::from_bytes([0u8; ID_BYTES]);
        for index in [0usize, 1, 63, 159] {
            let candidate = NodeId::random_in_bucket(&local, index);
            assert_eq!(local.distance(&candidate).bucket_index(), index);
        }
    }

    #[test]
    fn node_equality_is_by_id_alone() {
        let id = NodeId::random();
        let a = Node::new(id, "127.0.0.1:1".parse().unwrap());
        let b = Node::new(id, "127.0.0.1:2".parse().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn reliability_tracks_success_failure_ratio() {
        let mut node = Node::new(NodeId::random(), "127.0.0.1:1".parse().unwrap());
        node.record_success(10);
        node.record_success(20);
        node.record_failure();
        assert!((node.reliability - (2.0 / 3.0)).abs() < 1e-9);
    }
}
