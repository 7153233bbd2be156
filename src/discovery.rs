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

//! Discovery orchestrator: bootstrap, periodic lookups, bootstrap retry,
//! cache-expiry sweep, and peer-list merging (spec.md §4.3).

use crate::cache::{CachedPeer, PeerCache, Priority};
use crate::config::{DiscoveryConfig, MIN_VIABLE_PEERS};
use crate::dht::Dht;
use crate::error::DhtResult;
use crate::events::{EventBus, EventKind, Severity};
use crate::node::{Node, NodeId};
use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Observable lifecycle state streamed by the orchestrator (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Point-in-time snapshot of orchestrator observables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStatistics {
    pub network_status: NetworkStatus,
    pub discovered_peers: usize,
    pub connected_peers: usize,
    /// Total number of `mark_peer_connected` transitions observed over the
    /// orchestrator's lifetime (spec.md §6's observable output), monotonic
    /// and distinct from `connected_peers`, which is a point-in-time count.
    pub connection_count: u64,
    pub periodic_lookups_run: u64,
    pub periodic_lookup_errors: u64,
    pub bootstrap_attempts: u32,
}

impl DiscoveryStatistics {
    /// Serialize the snapshot for logging or an inspection endpoint.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    periodic_lookups_run: u64,
    periodic_lookup_errors: u64,
    bootstrap_attempts: u32,
    connection_count: u64,
}

/// Drives the DHT engine: bootstraps from seed peers, runs periodic
/// lookups, merges DHT findings with externally supplied peers, and
/// enforces lifecycle rules over the peer cache (spec.md §4.3).
pub struct DiscoveryOrchestrator {
    config: DiscoveryConfig,
    dht: Arc<Dht>,
    cache: Arc<PeerCache>,
    event_bus: Arc<EventBus>,
    status: RwLock<NetworkStatus>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: RwLock<StatsInner>,
}

impl DiscoveryOrchestrator {
    pub fn new(config: DiscoveryConfig, dht: Arc<Dht>, cache: Arc<PeerCache>, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            dht,
            cache,
            event_bus,
            status: RwLock::new(NetworkStatus::Stopped),
            shutdown_tx: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            stats: RwLock::new(StatsInner::default()),
        }
    }

    /// Insert `bootstrap_peers` into the cache flagged bootstrap, forward
    /// them to the DHT, and start the periodic-discovery / bootstrap-retry
    /// / cache-expiry-sweep loops. Idempotent.
    #[instrument(skip(self, bootstrap_peers))]
    pub async fn start(self: &Arc<Self>, bootstrap_peers: Vec<Peer>) -> DhtResult<()> {
        {
            let status = *self.status.read().await;
            if matches!(status, NetworkStatus::Running | NetworkStatus::Starting) {
                return Ok(());
            }
        }
        *self.status.write().await = NetworkStatus::Starting;

        self.adopt_bootstrap_peers(bootstrap_peers).await;
        self.dht.start().await?;
        self.cache.start().await;

        let (tx, _) = broadcast::channel(8);
        *self.shutdown_tx.write().await = Some(tx.clone());

        let mut tasks = self.tasks.lock().await;
        if self.config.enable_periodic_discovery {
            tasks.push(self.clone().spawn_periodic_discovery_loop(tx.subscribe()));
        }
        if self.config.enable_bootstrap_retry {
            tasks.push(self.clone().spawn_bootstrap_retry_loop(tx.subscribe()));
        }
        tasks.push(self.clone().spawn_cache_expiry_loop(tx.subscribe()));
        drop(tasks);

        *self.status.write().await = NetworkStatus::Running;
        self.event_bus.emit(EventKind::DiscoveryStarted).await;
        info!("discovery orchestrator started");
        Ok(())
    }

    /// Seed the DHT and flag every seed peer bootstrap in the cache
    /// (unconditional, spec.md §4.3). When `auto_warming_enabled` is set on
    /// the cache's config, the bulk insert runs through
    /// [`PeerCache::warm_cache`] instead of a one-by-one `put` loop.
    async fn adopt_bootstrap_peers(&self, bootstrap_peers: Vec<Peer>) {
        let mut seed_nodes = Vec::with_capacity(bootstrap_peers.len());
        for peer in &bootstrap_peers {
            if let Some(node_id) = peer.node_id() {
                seed_nodes.push(Node::new(node_id, peer.address));
            }
        }

        if self.cache.auto_warming_enabled() {
            self.cache.warm_cache(bootstrap_peers.clone()).await;
        } else {
            for peer in &bootstrap_peers {
                self.cache
                    .put(peer.clone(), Priority::High, None, HashSet::new(), HashMap::new())
                    .await;
            }
        }
        for peer in &bootstrap_peers {
            self.cache.set_bootstrap(&peer.peer_id, true).await;
        }

        self.dht.bootstrap(seed_nodes).await;
    }

    /// Cancel background loops, stop the DHT engine, and return.
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> DhtResult<()> {
        {
            let status = *self.status.read().await;
            if matches!(status, NetworkStatus::Stopped | NetworkStatus::Stopping) {
                return Ok(());
            }
        }
        *self.status.write().await = NetworkStatus::Stopping;

        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.cache.stop().await;
        let result = self.dht.stop().await;
        *self.status.write().await = if result.is_ok() {
            NetworkStatus::Stopped
        } else {
            NetworkStatus::Error
        };
        self.event_bus.emit(EventKind::DiscoveryStopped).await;
        result
    }

    /// Manually trigger one discovery round: a random-target `find_node`,
    /// converted to [`Peer`]s, added to the cache, and announced on the
    /// event bus.
    #[instrument(skip(self))]
    pub async fn discover_peers(&self) -> Vec<Peer> {
        let target = NodeId::random();
        let result = self.dht.find_node(target).await;
        let mut peers = Vec::new();
        for node in result.nodes.into_iter().take(self.config.max_peers_to_discover) {
            let peer = Peer::from_node(&node);
            self.cache
                .put(peer.clone(), Priority::Normal, None, HashSet::new(), HashMap::new())
                .await;
            self.event_bus
                .emit(EventKind::PeerDiscovered { peer: peer.clone() })
                .await;
            peers.push(peer);
        }
        peers
    }

    pub async fn add_discovered_peer(&self, peer: Peer) {
        self.cache
            .put(peer.clone(), Priority::Normal, None, HashSet::new(), HashMap::new())
            .await;
        if let Some(node_id) = peer.node_id() {
            self.dht.add_node(Node::new(node_id, peer.address)).await;
        }
        self.event_bus.emit(EventKind::PeerDiscovered { peer }).await;
    }

    pub async fn mark_peer_connected(&self, peer_id: &str) {
        if self.cache.set_connected(peer_id, true).await {
            self.stats.write().await.connection_count += 1;
            self.event_bus
                .emit(EventKind::PeerConnected {
                    peer_id: peer_id.to_string(),
                })
                .await;
            self.event_bus
                .emit(EventKind::PeerStatusChanged {
                    peer_id: peer_id.to_string(),
                    connected: true,
                })
                .await;
        }
    }

    pub async fn mark_peer_disconnected(&self, peer_id: &str) {
        if self.cache.set_connected(peer_id, false).await {
            self.event_bus
                .emit(EventKind::PeerDisconnected {
                    peer_id: peer_id.to_string(),
                })
                .await;
            self.event_bus
                .emit(EventKind::PeerStatusChanged {
                    peer_id: peer_id.to_string(),
                    connected: false,
                })
                .await;
        }
    }

    pub async fn remove_peer(&self, peer_id: &str) {
        if self.cache.remove(peer_id).await {
            if let Some(node_id) = crate::peer::peer_id_to_node_id(peer_id) {
                self.dht.remove_node(&node_id).await;
            }
            self.event_bus
                .emit(EventKind::PeerLost {
                    peer_id: peer_id.to_string(),
                })
                .await;
        }
    }

    pub async fn cached_peers(&self) -> Vec<Peer> {
        self.cache.cached_peers().await.into_iter().map(|c| c.peer).collect()
    }

    pub async fn discovered_peers(&self) -> Vec<Peer> {
        self.cached_peers().await
    }

    pub async fn connected_peers(&self) -> Vec<Peer> {
        self.cached_peers().await.into_iter().filter(|p| p.connected).collect()
    }

    pub async fn statistics(&self) -> DiscoveryStatistics {
        let stats = self.stats.read().await;
        let cached = self.cache.cached_peers().await;
        DiscoveryStatistics {
            network_status: *self.status.read().await,
            discovered_peers: cached.len(),
            connected_peers: cached.iter().filter(|p| p.peer.connected).count(),
            connection_count: stats.connection_count,
            periodic_lookups_run: stats.periodic_lookups_run,
            periodic_lookup_errors: stats.periodic_lookup_errors,
            bootstrap_attempts: stats.bootstrap_attempts,
        }
    }

    /// Register a callback for orchestrator/DHT events. Thin pass-through
    /// to the shared [`EventBus`] — kept here so callers that only hold a
    /// `DiscoveryOrchestrator` handle don't need a separate bus reference.
    pub async fn register_event_callback(
        &self,
        callback: crate::events::Callback,
        priority: crate::events::CallbackPriority,
        filter: Option<crate::events::Filter>,
        async_flag: bool,
    ) -> uuid::Uuid {
        self.event_bus
            .register_callback(callback, priority, filter, async_flag)
            .await
    }

    /// By `peer_id`, keep whichever entry has the greater `last_seen`;
    /// the merged stream is sorted descending by `last_seen` (spec.md
    /// §4.3's composition-point merge rule, used when this orchestrator is
    /// embedded in a higher-level manager with its own peer list).
    pub fn merge_peer_lists(a: Vec<Peer>, b: Vec<Peer>) -> Vec<Peer> {
        let mut merged: HashMap<String, Peer> = HashMap::new();
        for peer in a.into_iter().chain(b) {
            merged
                .entry(peer.peer_id.clone())
                .and_modify(|existing| {
                    if peer.last_seen_ms > existing.last_seen_ms {
                        *existing = peer.clone();
                    }
                })
                .or_insert(peer);
        }
        let mut out: Vec<Peer> = merged.into_values().collect();
        out.sort_by(|a, b| b.last_seen_ms.cmp(&a.last_seen_ms));
        out
    }

    async fn run_periodic_discovery(&self) -> bool {
        let before = self.cache.cached_peers().await.len();
        let discovered = self.discover_peers().await;
        let routing_table_empty = self.dht.routing_table_size().await == 0;
        let made_progress = !discovered.is_empty() || before > 0;
        if routing_table_empty && !made_progress {
            self.event_bus
                .emit(EventKind::DiscoveryError {
                    message: "periodic discovery found no peers and the routing table is empty".to_string(),
                    cause: None,
                    severity: Severity::Low,
                    recoverable: true,
                })
                .await;
            return false;
        }
        true
    }

    async fn run_bootstrap_retry(&self) {
        let known = self.cache.cached_peers().await.len();
        if known >= MIN_VIABLE_PEERS {
            return;
        }
        let attempts = self.stats.read().await.bootstrap_attempts;
        if attempts >= self.config.max_bootstrap_retries {
            return;
        }
        self.stats.write().await.bootstrap_attempts += 1;

        let seeds: Vec<CachedPeer> = self.cache.bootstrap_peers().await;
        let nodes: Vec<Node> = seeds
            .iter()
            .filter_map(|c| c.peer.node_id().map(|id| Node::new(id, c.peer.address)))
            .collect();
        if nodes.is_empty() {
            warn!("bootstrap retry requested but no bootstrap-flagged peers are cached");
            return;
        }
        debug!(count = nodes.len(), "retrying bootstrap from cached seed peers");
        self.dht.bootstrap(nodes).await;
    }

    async fn run_cache_expiry_sweep(&self) {
        let now = now_ms();
        let max_age_ms = self.config.peer_cache_expiry_time.as_millis() as u64;
        for entry in self.cache.cached_peers().await {
            if entry.bootstrap_flag || entry.peer.connected {
                continue;
            }
            if now.saturating_sub(entry.peer.last_seen_ms) <= max_age_ms {
                continue;
            }
            if !self.cache.remove(&entry.peer.peer_id).await {
                continue;
            }
            if let Some(node_id) = entry.peer.node_id() {
                self.dht.remove_node(&node_id).await;
            }
            self.event_bus
                .emit(EventKind::PeerLost {
                    peer_id: entry.peer.peer_id.clone(),
                })
                .await;
        }
    }

    fn spawn_periodic_discovery_loop(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let base_delay = self.config.discovery_interval;
            let max_delay = base_delay.saturating_mul(8).max(base_delay);
            let mut delay = base_delay;
            loop {
                // Jitter avoids every orchestrator in a swarm re-trying on
                // the same tick after a shared network blip.
                let jitter_ms = rand::thread_rng().gen_range(0..=250);
                tokio::select! {
                    _ = tokio::time::sleep(delay + Duration::from_millis(jitter_ms)) => {
                        self.stats.write().await.periodic_lookups_run += 1;
                        let ok = self.run_periodic_discovery().await;
                        if ok {
                            delay = base_delay;
                        } else {
                            self.stats.write().await.periodic_lookup_errors += 1;
                            delay = (delay.saturating_mul(2)).min(max_delay);
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("periodic discovery loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_bootstrap_retry_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval_duration = self.config.bootstrap_retry_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_bootstrap_retry().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("bootstrap retry loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_cache_expiry_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval_duration = divide_duration(self.config.peer_cache_expiry_time, 4);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_cache_expiry_sweep().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("cache expiry sweep loop shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn divide_duration(d: Duration, by: u32) -> Duration {
    Duration::from_nanos((d.as_nanos() as u64 / by as u64).max(1))
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
