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

//! Full-stack scenarios: Dht + DiscoveryOrchestrator + PeerCache + EventBus
//! wired together the way an application embedding this crate would.

use overlay_discovery::{
    CacheConfig, CallbackPriority, Dht, DhtConfig, DiscoveryConfig, DiscoveryOrchestrator,
    EventBus, EventKind, InboundSink, LoopbackNetwork, Node, NodeId, Peer, PeerCache,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

struct Participant {
    orchestrator: Arc<DiscoveryOrchestrator>,
    node_id: NodeId,
}

fn non_polling_discovery_config() -> DiscoveryConfig {
    DiscoveryConfig {
        enable_periodic_discovery: false,
        enable_bootstrap_retry: false,
        ..DiscoveryConfig::default()
    }
}

async fn spawn_participant(network: &LoopbackNetwork, port: u16) -> Participant {
    let node_id = NodeId::random();
    let mut dht_config = DhtConfig::default();
    dht_config.node_id = node_id;
    dht_config.k = 10;
    dht_config.alpha = 3;
    dht_config.ping_timeout = Duration::from_millis(200);
    let transport = Arc::new(network.handle(node_id));
    let dht = Arc::new(Dht::new(dht_config, transport).unwrap());
    network
        .register(node_id, addr(port), Arc::downgrade(&(dht.clone() as Arc<dyn InboundSink>)))
        .await;

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        non_polling_discovery_config(),
        dht,
        Arc::new(PeerCache::new(CacheConfig::default())),
        Arc::new(EventBus::new()),
    ));
    Participant { orchestrator, node_id }
}

fn peer_for(node_id: NodeId, port: u16) -> Peer {
    Peer::from_node(&Node::new(node_id, addr(port)))
}

#[tokio::test]
async fn bootstrap_then_store_and_find_across_orchestrated_nodes() {
    let network = LoopbackNetwork::new();
    let alice = spawn_participant(&network, 10).await;
    let bob = spawn_participant(&network, 11).await;

    alice.orchestrator.start(vec![peer_for(bob.node_id, 11)]).await.unwrap();
    bob.orchestrator.start(vec![peer_for(alice.node_id, 10)]).await.unwrap();

    assert_eq!(alice.orchestrator.cached_peers().await.len(), 1);
    assert_eq!(bob.orchestrator.cached_peers().await.len(), 1);

    alice.orchestrator.stop().await.unwrap();
    bob.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn discovered_peer_emits_event_observable_on_bus() {
    let network = LoopbackNetwork::new();
    let node = spawn_participant(&network, 20).await;

    let seen = Arc::new(Mutex::new(0u32));
    let seen_clone = seen.clone();
    node.orchestrator
        .register_event_callback(
            Arc::new(move |_event| {
                *seen_clone.lock().unwrap() += 1;
                Ok(())
            }),
            CallbackPriority::Normal,
            None,
            false,
        )
        .await;

    node.orchestrator.add_discovered_peer(peer_for(node.node_id, 20)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*seen.lock().unwrap(), 1);
}

#[tokio::test]
async fn standalone_event_bus_carries_discovery_events_independent_of_orchestrator() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    bus.register_callback(
        Arc::new(move |event| {
            seen_clone.lock().unwrap().push(event.tag());
            Ok(())
        }),
        CallbackPriority::High,
        None,
        false,
    )
    .await;

    bus.emit(EventKind::DiscoveryStarted).await;
    bus.emit(EventKind::PeerDiscovered { peer: peer_for(NodeId::random(), 1) }).await;
    bus.emit(EventKind::DiscoveryStopped).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        seen.lock().unwrap().clone(),
        vec!["DiscoveryStarted", "PeerDiscovered", "DiscoveryStopped"]
    );
}
