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

//! Routing table scenarios exercised through the public API only.

use overlay_discovery::{Node, NodeId, RoutingTable};

fn id_with_first_byte(byte: u8) -> NodeId {
    let mut bytes = [0u8; 20];
    bytes[0] = byte;
    NodeId::from_bytes(bytes)
}

fn node(id: NodeId, port: u16) -> Node {
    Node::new(id, format!("127.0.0.1:{port}").parse().unwrap())
}

#[tokio::test]
async fn bucket_ordering_scenario() {
    let local = NodeId::from_bytes([0u8; 20]);
    let table = RoutingTable::new(local, 20);

    let n1 = id_with_first_byte(0x01);
    let n2 = id_with_first_byte(0x02);
    let n4 = id_with_first_byte(0x04);

    table.add(node(n1, 1)).await;
    table.add(node(n2, 2)).await;
    table.add(node(n4, 4)).await;

    let closest = table.closest(&local, 10).await;
    let bucket_index = local.distance(&n1).bucket_index();
    assert_eq!(local.distance(&n2).bucket_index(), bucket_index);
    assert_eq!(local.distance(&n4).bucket_index(), bucket_index);
    assert_eq!(closest.len(), 3);

    // Re-inserting n1 moves it to most-recently-seen within its bucket.
    table.add(node(n1, 1)).await;
    let all = table.all_nodes().await;
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn partition_and_heal_scenario() {
    let local = NodeId::from_bytes([0xffu8; 20]);
    let table = RoutingTable::new(local, 20);

    let partition_one: Vec<NodeId> = (0..5u8).map(id_with_first_byte).collect();
    let partition_two: Vec<NodeId> = (5..10u8).map(id_with_first_byte).collect();

    for (i, id) in partition_one.iter().enumerate() {
        table.add(node(*id, i as u16)).await;
    }
    assert_eq!(table.size().await, 5);

    for id in &partition_one {
        table.remove(id).await;
    }
    for (i, id) in partition_two.iter().enumerate() {
        table.add(node(*id, 100 + i as u16)).await;
    }
    assert_eq!(table.size().await, 5);

    for (i, id) in partition_one.iter().enumerate() {
        table.add(node(*id, 200 + i as u16)).await;
    }
    assert!(table.size().await >= 10);
}

#[tokio::test]
async fn local_node_is_never_stored() {
    let local = NodeId::random();
    let table = RoutingTable::new(local, 20);
    table.add(node(local, 1)).await;
    assert_eq!(table.size().await, 0);
}
