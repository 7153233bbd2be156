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

//! Multi-node DHT store/find-value/find-node scenarios over the public API,
//! wired together with the in-process loopback transport.

use overlay_discovery::{Dht, DhtConfig, InboundSink, LoopbackNetwork, Node, NodeId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

async fn spawn_node(network: &LoopbackNetwork, port: u16, k: usize, alpha: usize) -> (NodeId, Arc<Dht>) {
    let node_id = NodeId::random();
    let mut config = DhtConfig::default();
    config.node_id = node_id;
    config.k = k;
    config.alpha = alpha;
    config.ping_timeout = Duration::from_millis(300);
    let transport = Arc::new(network.handle(node_id));
    let dht = Arc::new(Dht::new(config, transport).unwrap());
    network
        .register(node_id, addr(port), Arc::downgrade(&(dht.clone() as Arc<dyn InboundSink>)))
        .await;
    (node_id, dht)
}

async fn mesh(nodes: &[(NodeId, Arc<Dht>)]) {
    for i in 0..nodes.len() {
        for j in 0..nodes.len() {
            if i == j {
                continue;
            }
            let (other_id, _) = &nodes[j];
            nodes[i].1.add_node(Node::new(*other_id, addr(j as u16))).await;
        }
    }
}

#[tokio::test]
async fn store_and_find_scenario_across_five_nodes() {
    // spec.md §8 scenario 2: A,B,C,D,E fully meshed, k=2, alpha=2.
    let network = LoopbackNetwork::new();
    let mut nodes = Vec::new();
    for port in 0..5u16 {
        nodes.push(spawn_node(&network, port, 2, 2).await);
    }
    mesh(&nodes).await;

    let (_, dht_a) = &nodes[0];
    let (_, dht_b) = &nodes[1];

    assert!(dht_a.store(b"profile:alice".to_vec(), b"hello".to_vec()).await);
    let result = dht_b.find_value(b"profile:alice").await;
    assert!(result.found);
    assert_eq!(result.value, Some(b"hello".to_vec()));
}

#[tokio::test]
async fn find_node_returns_closest_known_nodes() {
    let network = LoopbackNetwork::new();
    let mut nodes = Vec::new();
    for port in 0..6u16 {
        nodes.push(spawn_node(&network, port, 4, 3).await);
    }
    mesh(&nodes).await;

    let (_, seeker) = &nodes[0];
    let target = NodeId::random();
    let result = seeker.find_node(target).await;
    assert!(!result.nodes.is_empty());
    assert!(!result.found);

    let mut sorted = result.nodes.clone();
    sorted.sort_by_key(|n| target.distance(&n.node_id));
    assert_eq!(sorted.iter().map(|n| n.node_id).collect::<Vec<_>>(),
               result.nodes.iter().map(|n| n.node_id).collect::<Vec<_>>());
}

#[tokio::test]
async fn lookup_against_unreachable_seed_still_terminates() {
    let network = LoopbackNetwork::new();
    let (_, dht) = spawn_node(&network, 0, 4, 3).await;
    let phantom = Node::new(NodeId::random(), addr(999));
    dht.add_node(phantom).await;

    let result = dht.find_node(NodeId::random()).await;
    assert!(!result.found);
}
