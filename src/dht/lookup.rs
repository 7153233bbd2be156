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

//! Iterative α-parallel Kademlia lookup (spec.md §4.2).

use super::message::{DhtMessage, Operation, PendingRequests};
use super::transport::Transport;
use crate::node::{Node, NodeId};
use crate::routing_table::RoutingTable;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};

/// Outcome of [`iterative_lookup`].
#[derive(Debug, Clone)]
pub struct LookupResult {
    /// Nodes closest to the target accumulated during the lookup, ascending
    /// by distance, capped at `k`.
    pub nodes: Vec<Node>,
    /// Set only for a `FIND_VALUE` lookup that succeeded.
    pub value: Option<Vec<u8>>,
    /// Whether a value was found (`FIND_VALUE` only; always `false` for a
    /// `FIND_NODE` lookup).
    pub found: bool,
}

/// Cap on shortlist size relative to `k*alpha`, bounding memory on a large
/// reachable network (spec.md §4.2 "implementations may cap it").
const SHORTLIST_CAP_FACTOR: usize = 3;

/// Run the iterative lookup described in spec.md §4.2. `value_key` selects
/// `FIND_VALUE` semantics (short-circuiting on the first value found) vs.
/// `FIND_NODE` (always exhausts the shortlist).
#[instrument(skip(table, transport, pending), fields(target = %target))]
pub async fn iterative_lookup(
    local_id: NodeId,
    table: &RoutingTable,
    transport: &dyn Transport,
    pending: &PendingRequests,
    target: NodeId,
    value_key: Option<Vec<u8>>,
    alpha: usize,
    k: usize,
    ping_timeout: Duration,
) -> LookupResult {
    let mut shortlist: Vec<Node> = table.closest(&target, k.saturating_mul(SHORTLIST_CAP_FACTOR)).await;
    sort_by_distance(&mut shortlist, &target);

    let mut queried: HashSet<NodeId> = HashSet::new();
    let op = if value_key.is_some() {
        Operation::FindValue
    } else {
        Operation::FindNode
    };

    loop {
        let round: Vec<Node> = shortlist
            .iter()
            .filter(|n| !queried.contains(&n.node_id))
            .take(alpha)
            .cloned()
            .collect();
        if round.is_empty() {
            break;
        }
        for node in &round {
            queried.insert(node.node_id);
        }

        let queries = round.iter().map(|node| {
            query_one(
                local_id,
                node,
                op,
                target,
                value_key.clone(),
                transport,
                pending,
                ping_timeout,
            )
        });
        let responses: Vec<Option<DhtMessage>> = join_all(queries).await;

        let mut discovered_new = false;
        for response in responses.into_iter().flatten() {
            if let Some(value) = response.value {
                debug!("lookup short-circuited by FIND_VALUE hit");
                return LookupResult {
                    nodes: top_k(shortlist, &target, k),
                    value: Some(value),
                    found: true,
                };
            }
            for node in response.nodes {
                if node.node_id == local_id {
                    continue;
                }
                if !shortlist.iter().any(|n| n.node_id == node.node_id) {
                    shortlist.push(node);
                    discovered_new = true;
                } else if !queried.contains(&node.node_id) {
                    discovered_new = true;
                }
            }
        }

        sort_by_distance(&mut shortlist, &target);
        shortlist.truncate(k.saturating_mul(SHORTLIST_CAP_FACTOR).max(k));

        let any_unqueried_left = shortlist.iter().any(|n| !queried.contains(&n.node_id));
        if !any_unqueried_left {
            debug!(discovered_new, "lookup converged: no unqueried nodes remain");
            break;
        }
    }

    LookupResult {
        nodes: top_k(shortlist, &target, k),
        value: None,
        found: false,
    }
}

async fn query_one(
    local_id: NodeId,
    node: &Node,
    op: Operation,
    target: NodeId,
    value_key: Option<Vec<u8>>,
    transport: &dyn Transport,
    pending: &PendingRequests,
    ping_timeout: Duration,
) -> Option<DhtMessage> {
    // `target_node_id` stays the routing target throughout, per the
    // "targetNodeId is uniformly the routing target" decision (spec.md §9):
    // the wire destination is `node`, carried by the `Transport::send`
    // argument, not by this field.
    let request = DhtMessage::request(op, local_id, target, value_key, None);
    let request_id = request.request_id;
    let rx = pending.register(request_id).await;

    if transport.send(node, request).await.is_err() {
        pending.fail(request_id, crate::error::DhtError::Transport {
            target: node.node_id.to_hex(),
            reason: "send failed".to_string(),
        })
        .await;
        return None;
    }

    match tokio::time::timeout(ping_timeout, rx).await {
        Ok(Ok(Ok(response))) => Some(response),
        _ => None,
    }
}

fn sort_by_distance(nodes: &mut [Node], target: &NodeId) {
    nodes.sort_by(|a, b| {
        target
            .distance(&a.node_id)
            .cmp(&target.distance(&b.node_id))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
}

fn top_k(mut nodes: Vec<Node>, target: &NodeId, k: usize) -> Vec<Node> {
    sort_by_distance(&mut nodes, target);
    nodes.truncate(k);
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _target: &Node, _message: DhtMessage) -> Result<(), crate::error::DhtError> {
            Err(crate::error::DhtError::Transport {
                target: "unreachable".into(),
                reason: "test double never answers".into(),
            })
        }
    }

    #[tokio::test]
    async fn lookup_against_empty_network_terminates() {
        let local = NodeId::from_bytes([0u8; 20]);
        let table = RoutingTable::new(local, 20);
        let pending = PendingRequests::new();
        let transport = NullTransport;

        let result = iterative_lookup(
            local,
            &table,
            &transport,
            &pending,
            NodeId::random(),
            None,
            3,
            20,
            Duration::from_millis(50),
        )
        .await;

        assert!(result.nodes.is_empty());
        assert!(!result.found);
        assert!(pending.is_empty().await);
    }
}
