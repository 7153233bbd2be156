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

//! Application-level peer view and its mapping to DHT [`NodeId`]s.

use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Application view of a peer. Created by discovery, destroyed by TTL
/// expiry unless flagged bootstrap/critical in the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    /// Hex rendering of the underlying `NodeId` bytes.
    pub peer_id: String,
    /// Network endpoint.
    pub address: SocketAddr,
    /// Whether a live connection is currently established.
    pub connected: bool,
    /// Millisecond Unix timestamp of the last observation.
    pub last_seen_ms: u64,
}

impl Peer {
    /// Build a `Peer` from a DHT-level `Node`, deriving `peer_id` from the
    /// node id via the total, deterministic hex encoding spec.md names.
    pub fn from_node(node: &Node) -> Self {
        Self {
            peer_id: node_id_to_peer_id(&node.node_id),
            address: node.address,
            connected: false,
            last_seen_ms: node.last_seen_ms,
        }
    }

    /// Recover the `NodeId` this peer was derived from. Returns `None` if
    /// `peer_id` is not valid hex or not 20 bytes — callers that accept
    /// peers from outside the DHT (e.g. an application-level merge) must
    /// handle that case rather than assume every peer maps back cleanly.
    pub fn node_id(&self) -> Option<NodeId> {
        peer_id_to_node_id(&self.peer_id)
    }
}

/// Deterministic `NodeId -> peer_id` encoding: lowercase hex of the raw
/// bytes. `peer_id_to_node_id` is its exact inverse.
pub fn node_id_to_peer_id(id: &NodeId) -> String {
    id.to_hex()
}

/// Inverse of [`node_id_to_peer_id`].
pub fn peer_id_to_node_id(peer_id: &str) -> Option<NodeId> {
    let bytes = hex::decode(peer_id).ok()?;
    let array: [u8; 20] = bytes.try_into().ok()?;
    Some(NodeId::from_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_mapping_round_trips() {
        let id = NodeId::random();
        let peer_id = node_id_to_peer_id(&id);
        assert_eq!(peer_id_to_node_id(&peer_id), Some(id));
    }

    #[test]
    fn malformed_peer_id_maps_to_none() {
        assert_eq!(peer_id_to_node_id("not-hex"), None);
        assert_eq!(peer_id_to_node_id("ab"), None);
    }

    #[test]
    fn from_node_derives_peer_id_deterministically() {
        let node = Node::new(NodeId::random(), "127.0.0.1:4242".parse().unwrap());
        let peer = Peer::from_node(&node);
        assert_eq!(peer.node_id(), Some(node.node_id));
        assert_eq!(peer.address, node.address);
    }
}
