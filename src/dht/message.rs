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

//! Wire-agnostic DHT message envelope and pending-request correlation
//! (spec.md §3, §4.2, §9).

use crate::error::DhtError;
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use uuid::Uuid;

/// The four Kademlia RPCs. No wire format is mandated — a `Transport`
/// implementation is free to serialize this however it likes, provided
/// `request_id` round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Ping,
    FindNode,
    FindValue,
    Store,
}

/// A DHT protocol message, request or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtMessage {
    pub op: Operation,
    pub request_id: Uuid,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub nodes: Vec<Node>,
    pub is_response: bool,
}

impl DhtMessage {
    /// Build a request envelope; `request_id` is freshly generated.
    pub fn request(
        op: Operation,
        source_node_id: NodeId,
        target_node_id: NodeId,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            op,
            request_id: Uuid::new_v4(),
            source_node_id,
            target_node_id,
            key,
            value,
            nodes: Vec::new(),
            is_response: false,
        }
    }

    /// Build the response envelope for an inbound request, sharing its
    /// `request_id`.
    pub fn response_to(request: &DhtMessage, source_node_id: NodeId) -> Self {
        Self {
            op: request.op,
            request_id: request.request_id,
            source_node_id,
            target_node_id: request.source_node_id,
            key: request.key.clone(),
            value: None,
            nodes: Vec::new(),
            is_response: true,
        }
    }
}

/// A dictionary of `request_id -> one-shot waiter`, completed exactly once
/// per entry. A second completion attempt is a silent no-op, matching
/// spec.md §9's pending-request-map note.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<Uuid, (oneshot::Sender<Result<DhtMessage, DhtError>>, Instant)>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new outbound request, returning the receiver its
    /// eventual completion arrives on.
    pub async fn register(
        &self,
        request_id: Uuid,
    ) -> oneshot::Receiver<Result<DhtMessage, DhtError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(request_id, (tx, Instant::now()));
        rx
    }

    /// Complete a pending request with its response. Returns `false` if no
    /// waiter was registered (already completed, timed out, or unknown).
    pub async fn complete(&self, request_id: Uuid, response: DhtMessage) -> bool {
        if let Some((tx, _)) = self.inner.lock().await.remove(&request_id) {
            let _ = tx.send(Ok(response));
            true
        } else {
            false
        }
    }

    /// Fail a pending request with `error`, typically on cancellation.
    pub async fn fail(&self, request_id: Uuid, error: DhtError) -> bool {
        if let Some((tx, _)) = self.inner.lock().await.remove(&request_id) {
            let _ = tx.send(Err(error));
            true
        } else {
            false
        }
    }

    /// Complete every request older than `timeout` with a timeout error.
    pub async fn sweep_timeouts(&self, timeout: Duration) {
        let mut inner = self.inner.lock().await;
        let expired: Vec<Uuid> = inner
            .iter()
            .filter(|(_, (_, started))| started.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((tx, started)) = inner.remove(&id) {
                debug!(%id, "pending request timed out");
                let _ = tx.send(Err(DhtError::Timeout {
                    target: id.to_string(),
                    elapsed: started.elapsed(),
                }));
            }
        }
    }

    /// Fail every outstanding request with a cancellation error. Called
    /// from `stop()` so no waiter is left hanging.
    pub async fn cancel_all(&self) {
        let mut inner = self.inner.lock().await;
        for (id, (tx, _)) in inner.drain() {
            let _ = tx.send(Err(DhtError::Cancelled(id.to_string())));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    #[tokio::test]
    async fn completion_resolves_the_registered_receiver() {
        let pending = PendingRequests::new();
        let request = DhtMessage::request(
            Operation::Ping,
            NodeId::random(),
            NodeId::random(),
            None,
            None,
        );
        let rx = pending.register(request.request_id).await;
        let response = DhtMessage::response_to(&request, request.target_node_id);
        assert!(pending.complete(request.request_id, response).await);
        assert!(rx.await.unwrap().is_ok());
        assert!(pending.is_empty().await);
    }

    #[tokio::test]
    async fn second_completion_is_a_no_op() {
        let pending = PendingRequests::new();
        let id = Uuid::new_v4();
        let _rx = pending.register(id).await;
        let msg = DhtMessage::request(Operation::Ping, NodeId::random(), NodeId::random(), None, None);
        assert!(pending.complete(id, msg.clone()).await);
        assert!(!pending.complete(id, msg).await);
    }

    #[tokio::test]
    async fn unregistered_request_reports_unreachable() {
        let local = NodeId::random();
        let node = Node::new(NodeId::random(), addr());
        let _ = node; // constructed only to exercise Node in this module's test scope
        let pending = PendingRequests::new();
        assert!(!pending
            .complete(
                Uuid::new_v4(),
                DhtMessage::request(Operation::Ping, local, local, None, None)
            )
            .await);
    }
}
