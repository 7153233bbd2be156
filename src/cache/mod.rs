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

//! Two-tier peer cache: hot (size-bounded, latency-optimal) and cold
//! (size-bounded, larger) tiers of [`CachedPeer`] records (spec.md §4.4).

pub mod eviction;

pub use eviction::EvictionPolicy;

use crate::config::CacheConfig;
use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Interval between reputation-decay passes (spec.md §4.4: "every 24h").
const REPUTATION_DECAY_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Running,
}

/// Retention priority. CRITICAL entries are never evicted from the hot
/// tier regardless of pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// One recorded dial/connect attempt, retained per-peer up to
/// `connection_history_size` entries in FIFO order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    pub timestamp_ms: u64,
    pub success: bool,
    pub latency_ms: u32,
    pub error: Option<String>,
    pub method_tag: String,
}

/// A peer as tracked by the cache: the application-level [`Peer`] plus
/// caching metadata, reputation, and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPeer {
    pub peer: Peer,
    pub cached_at_ms: u64,
    pub last_accessed_ms: u64,
    pub access_count: u64,
    pub ttl_ms: u64,
    pub priority: Priority,
    pub reputation: f64,
    pub bootstrap_flag: bool,
    pub connection_history: VecDeque<ConnectionAttempt>,
    pub network_distance: u32,
    pub tags: HashSet<String>,
    pub metadata: HashMap<String, String>,
}

const DEFAULT_TTL_MS: u64 = 24 * 3600 * 1000;
const HIGH_PRIORITY_TTL_MS: u64 = 7 * 24 * 3600 * 1000;

impl CachedPeer {
    /// Create a fresh entry. `ttl_ms` overrides the priority-derived
    /// default when given.
    pub fn new(peer: Peer, priority: Priority, ttl_ms: Option<u64>, now_ms: u64) -> Self {
        let default_ttl = match priority {
            Priority::High | Priority::Critical => HIGH_PRIORITY_TTL_MS,
            Priority::Low | Priority::Normal => DEFAULT_TTL_MS,
        };
        Self {
            peer,
            cached_at_ms: now_ms,
            last_accessed_ms: now_ms,
            access_count: 0,
            ttl_ms: ttl_ms.unwrap_or(default_ttl),
            priority,
            reputation: 0.5,
            bootstrap_flag: false,
            connection_history: VecDeque::new(),
            network_distance: u32::MAX,
            tags: HashSet::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.priority, Priority::Critical)
    }

    /// Whether this entry's TTL has lapsed as of `now_ms`. CRITICAL and
    /// bootstrap entries are excluded by the caller, not here — TTL expiry
    /// itself is priority-agnostic.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.cached_at_ms) > self.ttl_ms
    }

    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        let elapsed = now_ms.saturating_sub(self.cached_at_ms);
        self.ttl_ms.saturating_sub(elapsed)
    }

    fn touch_access(&mut self, now_ms: u64) {
        self.last_accessed_ms = now_ms;
        self.access_count += 1;
    }

    /// Hybrid eviction score from spec.md §3. Higher is more valuable.
    pub fn score(&self, now_ms: u64) -> f64 {
        let age_since_access = now_ms.saturating_sub(self.last_accessed_ms) as f64;
        let age_since_cached = now_ms.saturating_sub(self.cached_at_ms) as f64;
        let day_ms = 24.0 * 3600.0 * 1000.0;
        let ttl = self.ttl_ms.max(1) as f64;

        0.30 * self.reputation
            + 0.25 * (self.access_count as f64 / 100.0).min(1.0)
            + 0.25 * (1.0 - (age_since_access / day_ms).min(1.0))
            + 0.20 * (1.0 - (age_since_cached / ttl).min(1.0))
    }
}

/// Point-in-time snapshot of cache observables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub hot_size: usize,
    pub cold_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub avg_retrieval_time_ms: f64,
    pub by_priority: HashMap<String, usize>,
}

impl CacheStatistics {
    /// Serialize the snapshot for logging or an inspection endpoint.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: u64,
    misses: u64,
    evictions: u64,
    retrieval_latencies_us: VecDeque<u64>,
}

const RETRIEVAL_LATENCY_RING: usize = 100;

/// Two-tier peer cache. All state lives behind `tokio::sync::RwLock`s so
/// every operation is safely callable from concurrent tasks, matching the
/// async-mutex discipline spec.md §5 requires for shared cache state.
pub struct PeerCache {
    config: CacheConfig,
    hot: RwLock<HashMap<String, CachedPeer>>,
    cold: RwLock<HashMap<String, CachedPeer>>,
    stats: RwLock<CacheStats>,
    state: RwLock<LifecycleState>,
    shutdown_tx: RwLock<Option<broadcast::Sender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            hot: RwLock::new(HashMap::new()),
            cold: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            state: RwLock::new(LifecycleState::Stopped),
            shutdown_tx: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the background TTL-expiry sweep (every `cleanup_interval`) and
    /// 24h reputation-decay loop (spec.md §4.4). Idempotent.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Running {
            return;
        }
        *state = LifecycleState::Running;
        drop(state);

        let (tx, _) = broadcast::channel(8);
        *self.shutdown_tx.write().await = Some(tx.clone());

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.clone().spawn_cleanup_loop(tx.subscribe()));
        tasks.push(self.clone().spawn_decay_loop(tx.subscribe()));
        drop(tasks);
        debug!("peer cache maintenance loops started");
    }

    /// Cancel the background maintenance loops. Idempotent.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == LifecycleState::Stopped {
            return;
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
        debug!("peer cache maintenance loops stopped");
    }

    fn spawn_cleanup_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval_duration = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.cleanup_expired().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("cache cleanup loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_decay_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REPUTATION_DECAY_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.decay_reputation().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("cache reputation-decay loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Insert or update a peer. On update, `cached_at` is retained but
    /// `last_accessed`/`access_count` advance and reputation, bootstrap
    /// flag, and connection history are preserved.
    #[instrument(skip(self, peer, tags, metadata), fields(peer_id = %peer.peer_id))]
    pub async fn put(
        &self,
        peer: Peer,
        priority: Priority,
        ttl_ms: Option<u64>,
        tags: HashSet<String>,
        metadata: HashMap<String, String>,
    ) -> CachedPeer {
        let now = now_ms();
        let mut hot = self.hot.write().await;

        let entry = if let Some(mut existing) = hot.remove(&peer.peer_id) {
            existing.peer = peer;
            existing.priority = priority;
            if let Some(ttl) = ttl_ms {
                existing.ttl_ms = ttl;
            }
            existing.tags.extend(tags);
            existing.metadata.extend(metadata);
            existing.touch_access(now);
            existing
        } else {
            let mut cold = self.cold.write().await;
            let mut entry = cold.remove(&peer.peer_id).unwrap_or_else(|| {
                CachedPeer::new(peer.clone(), priority, ttl_ms, now)
            });
            entry.peer = peer;
            entry.priority = priority;
            if let Some(ttl) = ttl_ms {
                entry.ttl_ms = ttl;
            }
            entry.tags.extend(tags);
            entry.metadata.extend(metadata);
            entry.touch_access(now);
            entry
        };

        let peer_id = entry.peer.peer_id.clone();
        hot.insert(peer_id, entry.clone());
        drop(hot);
        self.enforce_hot_capacity().await;
        entry
    }

    /// Hot-tier lookup, falling back to cold with promotion. Respects TTL.
    #[instrument(skip(self))]
    pub async fn get(&self, peer_id: &str) -> Option<CachedPeer> {
        let started = Instant::now();
        let now = now_ms();

        {
            let mut hot = self.hot.write().await;
            if let Some(entry) = hot.get_mut(peer_id) {
                if entry.is_expired(now) && !entry.is_critical() && !entry.bootstrap_flag {
                    hot.remove(peer_id);
                    self.record_miss(started).await;
                    return None;
                }
                entry.touch_access(now);
                let result = entry.clone();
                drop(hot);
                self.record_hit(started).await;
                return Some(result);
            }
        }

        let promoted = {
            let mut cold = self.cold.write().await;
            match cold.remove(peer_id) {
                Some(mut entry) => {
                    if entry.is_expired(now) && !entry.is_critical() && !entry.bootstrap_flag {
                        None
                    } else {
                        entry.touch_access(now);
                        Some(entry)
                    }
                }
                None => None,
            }
        };

        match promoted {
            Some(entry) => {
                self.hot.write().await.insert(peer_id.to_string(), entry);
                self.enforce_hot_capacity().await;
                self.record_hit(started).await;
                self.hot.read().await.get(peer_id).cloned()
            }
            None => {
                self.record_miss(started).await;
                None
            }
        }
    }

    async fn record_hit(&self, started: Instant) {
        let mut stats = self.stats.write().await;
        stats.hits += 1;
        push_latency(&mut stats.retrieval_latencies_us, started.elapsed().as_micros() as u64);
    }

    async fn record_miss(&self, started: Instant) {
        let mut stats = self.stats.write().await;
        stats.misses += 1;
        push_latency(&mut stats.retrieval_latencies_us, started.elapsed().as_micros() as u64);
    }

    /// Clamp reputation into `[0,1]` after applying `delta`.
    pub async fn update_reputation(&self, peer_id: &str, delta: f64) -> bool {
        self.mutate(peer_id, |entry| {
            entry.reputation = (entry.reputation + delta).clamp(0.0, 1.0);
        })
        .await
    }

    /// Append a connection attempt (FIFO, capped) and adjust reputation by
    /// ±0.1, clamped.
    pub async fn record_connection_attempt(
        &self,
        peer_id: &str,
        success: bool,
        latency_ms: u32,
        error: Option<String>,
        method_tag: String,
    ) -> bool {
        let cap = self.config.connection_history_size;
        let delta = if success { 0.1 } else { -0.1 };
        self.mutate(peer_id, |entry| {
            entry.connection_history.push_back(ConnectionAttempt {
                timestamp_ms: now_ms(),
                success,
                latency_ms,
                error: error.clone(),
                method_tag: method_tag.clone(),
            });
            while entry.connection_history.len() > cap {
                entry.connection_history.pop_front();
            }
            entry.reputation = (entry.reputation + delta).clamp(0.0, 1.0);
        })
        .await
    }

    pub async fn update_network_distance(&self, peer_id: &str, distance: u32) -> bool {
        self.mutate(peer_id, |entry| entry.network_distance = distance)
            .await
    }

    /// Set or clear the bootstrap flag. Bootstrap entries are immune to
    /// both TTL expiry (see [`CachedPeer::is_expired`] callers) and the
    /// orchestrator's cache-expiry sweep.
    pub async fn set_bootstrap(&self, peer_id: &str, bootstrap: bool) -> bool {
        self.mutate(peer_id, |entry| entry.bootstrap_flag = bootstrap)
            .await
    }

    /// Update the connected flag and touch `last_seen` on the cached
    /// [`Peer`] view. Used by the orchestrator's `mark_peer_connected` /
    /// `mark_peer_disconnected`.
    pub async fn set_connected(&self, peer_id: &str, connected: bool) -> bool {
        self.mutate(peer_id, |entry| {
            entry.peer.connected = connected;
            entry.peer.last_seen_ms = now_ms();
        })
        .await
    }

    /// Apply `f` to the entry wherever it lives (hot or cold), leaving it
    /// in the same tier. Returns `false` if the peer is not cached.
    async fn mutate(&self, peer_id: &str, f: impl FnOnce(&mut CachedPeer)) -> bool {
        let mut hot = self.hot.write().await;
        if let Some(entry) = hot.get_mut(peer_id) {
            f(entry);
            return true;
        }
        drop(hot);
        let mut cold = self.cold.write().await;
        if let Some(entry) = cold.get_mut(peer_id) {
            f(entry);
            return true;
        }
        false
    }

    pub async fn get_by_priority(&self, priority: Priority) -> Vec<CachedPeer> {
        self.all_entries()
            .await
            .into_iter()
            .filter(|e| e.priority == priority)
            .collect()
    }

    pub async fn by_tags(&self, tag: &str) -> Vec<CachedPeer> {
        self.all_entries()
            .await
            .into_iter()
            .filter(|e| e.tags.contains(tag))
            .collect()
    }

    pub async fn bootstrap_peers(&self) -> Vec<CachedPeer> {
        self.all_entries()
            .await
            .into_iter()
            .filter(|e| e.bootstrap_flag)
            .collect()
    }

    /// Highest-reputation entries first, capped at `limit`.
    pub async fn by_reputation(&self, limit: usize) -> Vec<CachedPeer> {
        let mut all = self.all_entries().await;
        all.sort_by(|a, b| b.reputation.partial_cmp(&a.reputation).unwrap());
        all.truncate(limit);
        all
    }

    /// Bulk insert at HIGH priority, for bootstrap-peer pre-warming.
    pub async fn warm_cache(&self, peers: Vec<Peer>) {
        for peer in peers {
            self.put(peer, Priority::High, None, HashSet::new(), HashMap::new())
                .await;
        }
    }

    /// Whether the orchestrator should call [`PeerCache::warm_cache`]
    /// automatically from bootstrap peers, per `CacheConfig::auto_warming_enabled`.
    pub fn auto_warming_enabled(&self) -> bool {
        self.config.auto_warming_enabled
    }

    pub async fn remove(&self, peer_id: &str) -> bool {
        let removed_hot = self.hot.write().await.remove(peer_id).is_some();
        let removed_cold = self.cold.write().await.remove(peer_id).is_some();
        removed_hot || removed_cold
    }

    pub async fn clear(&self) {
        self.hot.write().await.clear();
        self.cold.write().await.clear();
    }

    pub async fn cached_peers(&self) -> Vec<CachedPeer> {
        self.hot.read().await.values().cloned().collect()
    }

    pub async fn statistics(&self) -> CacheStatistics {
        let hot = self.hot.read().await;
        let cold = self.cold.read().await;
        let stats = self.stats.read().await;

        let total = stats.hits + stats.misses;
        let hit_rate = if total > 0 {
            stats.hits as f64 / total as f64
        } else {
            0.0
        };
        let avg_us: f64 = if stats.retrieval_latencies_us.is_empty() {
            0.0
        } else {
            stats.retrieval_latencies_us.iter().sum::<u64>() as f64
                / stats.retrieval_latencies_us.len() as f64
        };

        let mut by_priority = HashMap::new();
        for entry in hot.values().chain(cold.values()) {
            *by_priority.entry(format!("{:?}", entry.priority)).or_insert(0) += 1;
        }

        CacheStatistics {
            hot_size: hot.len(),
            cold_size: cold.len(),
            hits: stats.hits,
            misses: stats.misses,
            hit_rate,
            eviction_count: stats.evictions,
            avg_retrieval_time_ms: avg_us / 1000.0,
            by_priority,
        }
    }

    /// Every 24h, scale down every entry's reputation by `(1 - decay_rate)`.
    #[instrument(skip(self))]
    pub async fn decay_reputation(&self) {
        let rate = self.config.reputation_decay_rate;
        let mut hot = self.hot.write().await;
        for entry in hot.values_mut() {
            entry.reputation = (entry.reputation * (1.0 - rate)).clamp(0.0, 1.0);
        }
        drop(hot);
        let mut cold = self.cold.write().await;
        for entry in cold.values_mut() {
            entry.reputation = (entry.reputation * (1.0 - rate)).clamp(0.0, 1.0);
        }
    }

    /// Background TTL sweep. CRITICAL and bootstrap entries are immune.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) {
        let now = now_ms();
        let mut hot = self.hot.write().await;
        hot.retain(|_, e| e.is_critical() || e.bootstrap_flag || !e.is_expired(now));
        drop(hot);
        let mut cold = self.cold.write().await;
        cold.retain(|_, e| e.is_critical() || e.bootstrap_flag || !e.is_expired(now));
    }

    async fn all_entries(&self) -> Vec<CachedPeer> {
        let hot = self.hot.read().await;
        let cold = self.cold.read().await;
        hot.values().chain(cold.values()).cloned().collect()
    }

    /// Evict the worst-ranked non-CRITICAL hot entries until `hot.len() <=
    /// max_memory_cache_size`, moving evicted entries to cold tier while it
    /// has room.
    async fn enforce_hot_capacity(&self) {
        let max = self.config.max_memory_cache_size;
        loop {
            let hot_len = self.hot.read().await.len();
            if hot_len <= max {
                return;
            }
            let now = now_ms();
            let victim = {
                let hot = self.hot.read().await;
                eviction::select_eviction_victim(hot.values(), self.config.eviction_policy, now)
            };
            let Some(victim_id) = victim else {
                warn!("hot tier over capacity but every entry is CRITICAL");
                return;
            };
            let evicted = self.hot.write().await.remove(&victim_id);
            if let Some(entry) = evicted {
                self.stats.write().await.evictions += 1;
                debug!(peer_id = %victim_id, "evicted from hot tier");
                let mut cold = self.cold.write().await;
                if cold.len() < self.config.max_disk_cache_size {
                    cold.insert(victim_id, entry);
                }
            }
        }
    }
}

fn push_latency(ring: &mut VecDeque<u64>, sample_us: u64) {
    ring.push_back(sample_us);
    while ring.len() > RETRIEVAL_LATENCY_RING {
        ring.pop_front();
    }
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> Peer {
        Peer {
            peer_id: id.to_string(),
            address: "127.0.0.1:1".parse().unwrap(),
            connected: false,
            last_seen_ms: 0,
        }
    }

    #[tokio::test]
    async fn critical_retention_scenario() {
        // spec.md §8 scenario 4
        let mut config = CacheConfig::default();
        config.max_memory_cache_size = 3;
        let cache = PeerCache::new(config);

        cache
            .put(peer("p1"), Priority::Critical, None, HashSet::new(), HashMap::new())
            .await;
        for i in 2..=5 {
            cache
                .put(
                    peer(&format!("p{i}")),
                    Priority::Normal,
                    None,
                    HashSet::new(),
                    HashMap::new(),
                )
                .await;
        }

        assert!(cache.get("p1").await.is_some());
        assert!(cache.hot.read().await.len() <= 3);
    }

    #[tokio::test]
    async fn connection_history_cap_scenario() {
        // spec.md §8 scenario 6
        let mut config = CacheConfig::default();
        config.connection_history_size = 3;
        let cache = PeerCache::new(config);
        cache
            .put(peer("p"), Priority::Normal, None, HashSet::new(), HashMap::new())
            .await;

        for i in 0..4 {
            cache
                .record_connection_attempt(
                    "p",
                    i % 2 == 0,
                    10 + i,
                    None,
                    "dial".to_string(),
                )
                .await;
        }

        let entry = cache.get("p").await.unwrap();
        assert_eq!(entry.connection_history.len(), 3);
    }

    #[tokio::test]
    async fn reputation_stays_within_bounds() {
        let cache = PeerCache::new(CacheConfig::default());
        cache
            .put(peer("p"), Priority::Normal, None, HashSet::new(), HashMap::new())
            .await;
        for _ in 0..100 {
            cache.update_reputation("p", 1.0).await;
        }
        assert_eq!(cache.get("p").await.unwrap().reputation, 1.0);
        for _ in 0..100 {
            cache.update_reputation("p", -1.0).await;
        }
        assert_eq!(cache.get("p").await.unwrap().reputation, 0.0);
    }

    #[tokio::test]
    async fn tier_disjointness_holds_after_eviction() {
        let mut config = CacheConfig::default();
        config.max_memory_cache_size = 2;
        let cache = PeerCache::new(config);
        for i in 0..5 {
            cache
                .put(
                    peer(&format!("p{i}")),
                    Priority::Normal,
                    None,
                    HashSet::new(),
                    HashMap::new(),
                )
                .await;
        }
        let hot_ids: HashSet<_> = cache.hot.read().await.keys().cloned().collect();
        let cold_ids: HashSet<_> = cache.cold.read().await.keys().cloned().collect();
        assert!(hot_ids.is_disjoint(&cold_ids));
    }

    #[tokio::test]
    async fn bootstrap_flag_survives_expiry_check() {
        let cache = PeerCache::new(CacheConfig::default());
        cache
            .put(peer("seed"), Priority::Normal, Some(0), HashSet::new(), HashMap::new())
            .await;
        cache.set_bootstrap("seed", true).await;
        assert!(cache.get("seed").await.is_some());
    }

    #[tokio::test]
    async fn set_connected_updates_peer_view() {
        let cache = PeerCache::new(CacheConfig::default());
        cache
            .put(peer("p"), Priority::Normal, None, HashSet::new(), HashMap::new())
            .await;
        assert!(cache.set_connected("p", true).await);
        assert!(cache.get("p").await.unwrap().peer.connected);
    }

    #[tokio::test]
    async fn cold_tier_promotion_on_get() {
        let mut config = CacheConfig::default();
        config.max_memory_cache_size = 1;
        let cache = PeerCache::new(config);
        cache
            .put(peer("a"), Priority::Normal, None, HashSet::new(), HashMap::new())
            .await;
        cache
            .put(peer("b"), Priority::Normal, None, HashSet::new(), HashMap::new())
            .await;
        // "a" should have been pushed to cold; fetching it promotes it back.
        let fetched = cache.get("a").await;
        assert!(fetched.is_some());
    }

    #[tokio_test::tokio::test]
    async fn idempotent_start_stop() {
        let cache = Arc::new(PeerCache::new(CacheConfig::default()));
        cache.start().await;
        cache.start().await;
        cache.stop().await;
        cache.stop().await;
    }

    #[tokio::test]
    async fn cleanup_loop_removes_expired_entries_in_background() {
        let mut config = CacheConfig::default();
        config.cleanup_interval = Duration::from_millis(10);
        let cache = Arc::new(PeerCache::new(config));
        cache
            .put(peer("expires"), Priority::Normal, Some(0), HashSet::new(), HashMap::new())
            .await;
        cache.start().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.stop().await;
        assert_eq!(cache.hot.read().await.len(), 0);
    }
}
