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

//! Kademlia DHT engine: store/find-value/find-node/ping, iterative
//! α-parallel lookups, maintenance loops, message dispatch (spec.md §4.2).

pub mod lookup;
pub mod message;
pub mod transport;

pub use lookup::LookupResult;
pub use message::{DhtMessage, Operation, PendingRequests};
pub use transport::{InboundSink, LoopbackNetwork, LoopbackTransport, Transport};

use crate::config::DhtConfig;
use crate::error::{DhtError, DhtResult};
use crate::node::{Node, NodeId};
use crate::routing_table::RoutingTable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const LATENCY_RING: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Running,
}

struct StoredValue {
    value: Vec<u8>,
    stored_at_ms: u64,
}

/// Point-in-time snapshot of DHT engine observables (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DhtStatistics {
    pub routing_table_size: usize,
    pub stored_keys: usize,
    pub lookups_performed: u64,
    pub stores_performed: u64,
    pub pings_sent: u64,
    pub pings_succeeded: u64,
    pub avg_lookup_latency_ms: f64,
}

impl DhtStatistics {
    /// Serialize the snapshot for logging or an inspection endpoint.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    lookups_performed: u64,
    stores_performed: u64,
    pings_sent: u64,
    pings_succeeded: u64,
    lookup_latencies_us: VecDeque<u64>,
}

/// Observer invoked for every inbound `DhtMessage`, request or response,
/// prior to (and independent of) the engine's own handling. Mirrors the
/// "DHT-message callback" half of spec.md §9's two-registration note; the
/// application-message-type map it also mentions belongs to the layer
/// above this crate, not this engine.
pub type MessageHandler = Arc<dyn Fn(&Node, &DhtMessage) + Send + Sync>;

/// Kademlia DHT engine (spec.md §4.2). Owns the routing table, the local
/// key/value store, pending-request correlation, and the maintenance loops
/// that keep both fresh.
pub struct Dht {
    config: DhtConfig,
    routing_table: Arc<RoutingTable>,
    store: RwLock<HashMap<Vec<u8>, StoredValue>>,
    pending: Arc<PendingRequests>,
    transport: Arc<dyn Transport>,
    state: RwLock<LifecycleState>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    message_handlers: RwLock<Vec<MessageHandler>>,
    stats: RwLock<StatsInner>,
}

impl Dht {
    /// Build a new engine. Validates `config` synchronously — an invalid
    /// configuration is a [`DhtError::ConfigInvalid`] and the engine is
    /// never constructed (spec.md §7: fatal to startup).
    pub fn new(config: DhtConfig, transport: Arc<dyn Transport>) -> DhtResult<Self> {
        config.validate()?;
        let routing_table = Arc::new(RoutingTable::new(config.node_id, config.k));
        Ok(Self {
            routing_table,
            store: RwLock::new(HashMap::new()),
            pending: Arc::new(PendingRequests::new()),
            transport,
            state: RwLock::new(LifecycleState::Stopped),
            shutdown_tx: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            message_handlers: RwLock::new(Vec::new()),
            stats: RwLock::new(StatsInner::default()),
            config,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing_table
    }

    /// Start the maintenance loops (bucket refresh, republish, pending-
    /// request timeout sweep). Idempotent.
    #[instrument(skip(self), fields(node_id = %self.local_id()))]
    pub async fn start(self: &Arc<Self>) -> DhtResult<()> {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Running {
            return Ok(());
        }
        *state = LifecycleState::Running;
        drop(state);

        let (tx, _) = broadcast::channel(8);
        *self.shutdown_tx.write().await = Some(tx.clone());

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.clone().spawn_bucket_refresh_loop(tx.subscribe()));
        tasks.push(self.clone().spawn_republish_loop(tx.subscribe()));
        tasks.push(self.clone().spawn_timeout_sweep_loop(tx.subscribe()));
        drop(tasks);

        info!("DHT engine started");
        Ok(())
    }

    /// Cancel maintenance loops, fail every pending request, and return.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> DhtResult<()> {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Stopped {
            return Ok(());
        }
        *state = LifecycleState::Stopped;
        drop(state);

        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.pending.cancel_all().await;
        info!("DHT engine stopped");
        Ok(())
    }

    /// Write `(key, value)` locally and best-effort replicate to up to `k`
    /// closest nodes. Local storage in this engine is infallible, so this
    /// always returns `true`; the `||` is kept to mirror spec.md's "true
    /// iff at least one remote acknowledged STORE or the value was stored
    /// locally" wording.
    #[instrument(skip(self, value), fields(node_id = %self.local_id()))]
    pub async fn store(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        let local_stored = self.store_locally(key.clone(), value.clone()).await;
        let remote_ack = self.replicate(&key, &value).await;
        self.stats.write().await.stores_performed += 1;
        local_stored || remote_ack
    }

    async fn store_locally(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.store.write().await.insert(
            key,
            StoredValue {
                value,
                stored_at_ms: now_ms(),
            },
        );
        true
    }

    async fn replicate(&self, key: &[u8], value: &[u8]) -> bool {
        let target = NodeId::from_hash(blake3::hash(key));
        let closest = self.routing_table.closest(&target, self.config.k).await;
        let mut acked = false;
        for node in closest {
            if node.node_id == self.local_id() {
                continue;
            }
            if self
                .send_request(&node, Operation::Store, target, Some(key.to_vec()), Some(value.to_vec()))
                .await
                .is_some()
            {
                acked = true;
            }
        }
        acked
    }

    /// Local hit short-circuits; else run the iterative lookup with
    /// FIND_VALUE semantics.
    #[instrument(skip(self), fields(node_id = %self.local_id()))]
    pub async fn find_value(&self, key: &[u8]) -> LookupResult {
        if let Some(stored) = self.store.read().await.get(key) {
            return LookupResult {
                nodes: Vec::new(),
                value: Some(stored.value.clone()),
                found: true,
            };
        }
        let target = NodeId::from_hash(blake3::hash(key));
        let started = Instant::now();
        let result = lookup::iterative_lookup(
            self.local_id(),
            &self.routing_table,
            self.transport.as_ref(),
            &self.pending,
            target,
            Some(key.to_vec()),
            self.config.alpha,
            self.config.k,
            self.config.ping_timeout,
        )
        .await;
        self.record_lookup(started).await;
        result
    }

    /// Iterative lookup with FIND_NODE semantics: never short-circuits on a
    /// value, always exhausts the shortlist.
    #[instrument(skip(self), fields(node_id = %self.local_id()))]
    pub async fn find_node(&self, target: NodeId) -> LookupResult {
        let started = Instant::now();
        let result = lookup::iterative_lookup(
            self.local_id(),
            &self.routing_table,
            self.transport.as_ref(),
            &self.pending,
            target,
            None,
            self.config.alpha,
            self.config.k,
            self.config.ping_timeout,
        )
        .await;
        self.record_lookup(started).await;
        result
    }

    async fn record_lookup(&self, started: Instant) {
        let mut stats = self.stats.write().await;
        stats.lookups_performed += 1;
        stats
            .lookup_latencies_us
            .push_back(started.elapsed().as_micros() as u64);
        while stats.lookup_latencies_us.len() > LATENCY_RING {
            stats.lookup_latencies_us.pop_front();
        }
    }

    /// One-shot PING with timeout. Updates `last_seen` on success.
    #[instrument(skip(self), fields(node_id = %self.local_id()))]
    pub async fn ping(&self, node: &Node) -> bool {
        self.stats.write().await.pings_sent += 1;
        let target = node.node_id;
        let ok = self
            .send_request(node, Operation::Ping, target, None, None)
            .await
            .is_some();
        if ok {
            self.routing_table.update_last_seen(&node.node_id).await;
            self.stats.write().await.pings_succeeded += 1;
        }
        ok
    }

    async fn send_request(
        &self,
        node: &Node,
        op: Operation,
        target: NodeId,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
    ) -> Option<DhtMessage> {
        let request = DhtMessage::request(op, self.local_id(), target, key, value);
        let request_id = request.request_id;
        let rx = self.pending.register(request_id).await;

        if self.transport.send(node, request).await.is_err() {
            self.pending
                .fail(
                    request_id,
                    DhtError::Transport {
                        target: node.node_id.to_hex(),
                        reason: "send failed".to_string(),
                    },
                )
                .await;
            return None;
        }

        match tokio::time::timeout(self.config.ping_timeout, rx).await {
            Ok(Ok(Ok(response))) => Some(response),
            _ => None,
        }
    }

    pub async fn add_node(&self, node: Node) -> bool {
        self.routing_table.add(node).await
    }

    pub async fn remove_node(&self, node_id: &NodeId) -> bool {
        self.routing_table.remove(node_id).await
    }

    pub async fn closest_nodes(&self, key: &NodeId, count: usize) -> Vec<Node> {
        self.routing_table.closest(key, count).await
    }

    /// Add `seeds` to the routing table and issue a self-directed
    /// `find_node` to populate surrounding buckets.
    #[instrument(skip(self, seeds), fields(node_id = %self.local_id()))]
    pub async fn bootstrap(&self, seeds: Vec<Node>) {
        for seed in seeds {
            self.routing_table.add(seed).await;
        }
        let local = self.local_id();
        let _ = self.find_node(local).await;
    }

    /// For each bucket needing refresh, issue a `find_node` for a synthetic
    /// id inside that bucket's range.
    #[instrument(skip(self), fields(node_id = %self.local_id()))]
    pub async fn refresh_buckets(&self) -> DhtResult<()> {
        let due = self
            .routing_table
            .buckets_needing_refresh(self.config.bucket_refresh_interval)
            .await;
        for index in due {
            let target = NodeId::random_in_bucket(&self.local_id(), index);
            let _ = self.find_node(target).await;
            self.routing_table.mark_refreshed(index).await;
        }
        Ok(())
    }

    /// Re-issue `store` for every locally held key/value whose age is
    /// below `expire_interval`; drop entries that have aged out.
    #[instrument(skip(self), fields(node_id = %self.local_id()))]
    pub async fn republish(&self) -> DhtResult<()> {
        let now = now_ms();
        let expire_ms = self.config.expire_interval.as_millis() as u64;
        let alive: Vec<(Vec<u8>, Vec<u8>)> = {
            let mut store = self.store.write().await;
            store.retain(|_, v| now.saturating_sub(v.stored_at_ms) < expire_ms);
            store
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect()
        };
        for (key, value) in alive {
            self.store(key, value).await;
        }
        Ok(())
    }

    /// Best-effort send through the transport boundary. `false` on
    /// transport failure; never panics or propagates.
    pub async fn send_message(&self, node: &Node, message: DhtMessage) -> bool {
        self.transport.send(node, message).await.is_ok()
    }

    /// Register an observer invoked for every inbound message (request or
    /// response), in addition to the engine's own handling.
    pub async fn register_message_handler(&self, handler: MessageHandler) {
        self.message_handlers.write().await.push(handler);
    }

    /// Handle an inbound message as responder (spec.md §4.2). Adds the
    /// source to the routing table unconditionally, then either completes
    /// a pending request (response) or builds and sends the appropriate
    /// reply (request).
    #[instrument(skip(self, message), fields(node_id = %self.local_id(), op = ?message.op, is_response = message.is_response))]
    pub async fn handle_inbound(&self, from: Node, message: DhtMessage) {
        self.routing_table.add(from.clone()).await;

        {
            let handlers = self.message_handlers.read().await;
            for handler in handlers.iter() {
                handler(&from, &message);
            }
        }

        if message.is_response {
            self.pending.complete(message.request_id, message).await;
            return;
        }

        match message.op {
            Operation::Ping => {
                let response = DhtMessage::response_to(&message, self.local_id());
                if self.transport.send(&from, response).await.is_err() {
                    warn!(from = %from.node_id, "failed to send PING response");
                }
            }
            Operation::FindNode => {
                let nodes = self
                    .routing_table
                    .closest(&message.target_node_id, self.config.k)
                    .await;
                let mut response = DhtMessage::response_to(&message, self.local_id());
                response.nodes = nodes;
                if self.transport.send(&from, response).await.is_err() {
                    warn!(from = %from.node_id, "failed to send FIND_NODE response");
                }
            }
            Operation::FindValue => {
                let hit = match &message.key {
                    Some(key) => self.store.read().await.get(key).map(|s| s.value.clone()),
                    None => None,
                };
                let mut response = DhtMessage::response_to(&message, self.local_id());
                match hit {
                    Some(value) => response.value = Some(value),
                    None => {
                        response.nodes = self
                            .routing_table
                            .closest(&message.target_node_id, self.config.k)
                            .await;
                    }
                }
                if self.transport.send(&from, response).await.is_err() {
                    warn!(from = %from.node_id, "failed to send FIND_VALUE response");
                }
            }
            Operation::Store => {
                if let (Some(key), Some(value)) = (message.key.clone(), message.value.clone()) {
                    self.store.write().await.insert(
                        key,
                        StoredValue {
                            value,
                            stored_at_ms: now_ms(),
                        },
                    );
                } else {
                    debug!("STORE request missing key/value, ignoring");
                }
                let response = DhtMessage::response_to(&message, self.local_id());
                if self.transport.send(&from, response).await.is_err() {
                    warn!(from = %from.node_id, "failed to send STORE response");
                }
            }
        }
    }

    /// Snapshot of every node currently known to the routing table.
    pub async fn discovered_nodes(&self) -> Vec<Node> {
        self.routing_table.all_nodes().await
    }

    pub async fn routing_table_size(&self) -> usize {
        self.routing_table.size().await
    }

    pub async fn statistics(&self) -> DhtStatistics {
        let stats = self.stats.read().await;
        let avg_us = if stats.lookup_latencies_us.is_empty() {
            0.0
        } else {
            stats.lookup_latencies_us.iter().sum::<u64>() as f64
                / stats.lookup_latencies_us.len() as f64
        };
        DhtStatistics {
            routing_table_size: self.routing_table.size().await,
            stored_keys: self.store.read().await.len(),
            lookups_performed: stats.lookups_performed,
            stores_performed: stats.stores_performed,
            pings_sent: stats.pings_sent,
            pings_succeeded: stats.pings_succeeded,
            avg_lookup_latency_ms: avg_us / 1000.0,
        }
    }

    fn spawn_bucket_refresh_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval_duration = self.config.bucket_refresh_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.refresh_buckets().await {
                            warn!(%err, "bucket refresh iteration skipped");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("bucket refresh loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_republish_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval_duration = self.config.republish_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.republish().await {
                            warn!(%err, "republish iteration skipped");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("republish loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_timeout_sweep_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let timeout = self.config.ping_timeout;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeout);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.pending.sweep_timeouts(timeout).await;
                    }
                    _ = shutdown.recv() => {
                        debug!("pending-request timeout sweep shutting down");
                        break;
                    }
                }
            }
        })
    }

}

#[async_trait]
impl InboundSink for Dht {
    async fn deliver(&self, from: Node, message: DhtMessage) {
        self.handle_inbound(from, message).await;
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
