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

//! The transport boundary (spec.md §6): unreliable, unordered delivery of
//! [`DhtMessage`]s, with wire encoding and serialization left to the
//! caller.

use super::message::DhtMessage;
use crate::error::DhtError;
use crate::node::{Node, NodeId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// User-supplied delivery mechanism. `send` hands a message to `target`;
/// inbound messages arrive at whatever handler the caller wired up when
/// constructing the transport (the DHT engine exposes
/// [`crate::dht::Dht::handle_inbound`] for exactly that purpose). The
/// transport is the one party that genuinely knows a message's originating
/// address (e.g. a UDP socket's `recv_from`), so it is responsible for
/// resolving `from` before calling `handle_inbound`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort delivery. Returning `Err` fails only the caller's
    /// current operation for this one target — it must never be treated
    /// as fatal to the engine.
    async fn send(&self, target: &Node, message: DhtMessage) -> Result<(), DhtError>;
}

/// Narrow sink so [`LoopbackNetwork`] does not need to know about `Dht`
/// directly, avoiding a dependency cycle between `transport` and `mod`.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn deliver(&self, from: Node, message: DhtMessage);
}

/// In-process loopback transport for tests: routes messages directly to
/// other registered engines by `NodeId`, simulating a fully-meshed network
/// without real sockets. Grounded on the teacher's in-process test-harness
/// pattern of wiring DHT instances together without real sockets.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    routes: Arc<RwLock<HashMap<NodeId, (SocketAddr, Weak<dyn InboundSink>)>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, node_id: NodeId, address: SocketAddr, sink: Weak<dyn InboundSink>) {
        self.routes.write().await.insert(node_id, (address, sink));
    }

    pub async fn unregister(&self, node_id: &NodeId) {
        self.routes.write().await.remove(node_id);
    }

    /// A [`Transport`] handle bound to this network, used for one
    /// participant's outbound sends.
    pub fn handle(&self, local_id: NodeId) -> LoopbackTransport {
        LoopbackTransport {
            network: self.clone(),
            local_id,
        }
    }
}

/// A [`Transport`] implementation backed by a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    local_id: NodeId,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, target: &Node, message: DhtMessage) -> Result<(), DhtError> {
        let (sink, from_addr) = {
            let routes = self.network.routes.read().await;
            let sink = routes.get(&target.node_id).map(|(_, s)| s.clone());
            let from_addr = routes
                .get(&self.local_id)
                .map(|(addr, _)| *addr)
                .unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());
            (sink, from_addr)
        };
        match sink.and_then(|weak| weak.upgrade()) {
            Some(sink) => {
                sink.deliver(Node::new(self.local_id, from_addr), message).await;
                Ok(())
            }
            None => Err(DhtError::Transport {
                target: target.node_id.to_hex(),
                reason: "no route registered for target".to_string(),
            }),
        }
    }
}
