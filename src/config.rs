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

//! Configuration structures and their documented defaults (spec.md §6).

use crate::cache::EvictionPolicy;
use crate::error::DhtError;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Kademlia DHT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Local node id. Random when left unset by [`DhtConfig::default`].
    pub node_id: NodeId,
    /// Bucket capacity, `k`.
    pub k: usize,
    /// Lookup parallelism, `alpha`.
    pub alpha: usize,
    /// Interval between `refresh_buckets()` maintenance sweeps.
    pub bucket_refresh_interval: Duration,
    /// Interval between republishing locally-held key/value pairs.
    pub republish_interval: Duration,
    /// Age past which a locally-held value is dropped instead of republished.
    pub expire_interval: Duration,
    /// Per-request timeout for outbound DHT messages.
    pub ping_timeout: Duration,
    /// Maximum retries for an outbound request before it is treated as a
    /// timeout failure for that target.
    pub max_retries: u32,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::random(),
            k: 20,
            alpha: 3,
            bucket_refresh_interval: Duration::from_secs(3600),
            republish_interval: Duration::from_secs(3600),
            expire_interval: Duration::from_secs(24 * 3600),
            ping_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl DhtConfig {
    /// Validate documented ranges. Called from `Dht::start`; a failure here
    /// is a [`DhtError::ConfigInvalid`] and prevents startup.
    pub fn validate(&self) -> Result<(), DhtError> {
        if self.k == 0 {
            return Err(DhtError::ConfigInvalid("k must be >= 1".into()));
        }
        if self.alpha == 0 {
            return Err(DhtError::ConfigInvalid("alpha must be >= 1".into()));
        }
        if self.ping_timeout.is_zero() {
            return Err(DhtError::ConfigInvalid("ping_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Configuration for the discovery orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Interval between periodic random-target lookups.
    pub discovery_interval: Duration,
    /// Cap on peers converted from a single periodic lookup.
    pub max_peers_to_discover: usize,
    /// Target size of the orchestrator's internal peer cache.
    pub peer_cache_size: usize,
    /// Age past which a non-bootstrap, non-connected cached peer is dropped.
    pub peer_cache_expiry_time: Duration,
    /// Delay between bootstrap retry attempts.
    pub bootstrap_retry_interval: Duration,
    /// Cap on bootstrap retry attempts.
    pub max_bootstrap_retries: u32,
    /// Whether the periodic-discovery loop runs at all.
    pub enable_periodic_discovery: bool,
    /// Whether the bootstrap-retry loop runs at all.
    pub enable_bootstrap_retry: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(30),
            max_peers_to_discover: 50,
            peer_cache_size: 200,
            peer_cache_expiry_time: Duration::from_secs(3600),
            bootstrap_retry_interval: Duration::from_secs(60),
            max_bootstrap_retries: 5,
            enable_periodic_discovery: true,
            enable_bootstrap_retry: true,
        }
    }
}

/// Minimum number of known peers below which bootstrap retry kicks in.
pub const MIN_VIABLE_PEERS: usize = 5;

/// Configuration for the two-tier peer cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Hot-tier capacity.
    pub max_memory_cache_size: usize,
    /// Cold-tier capacity.
    pub max_disk_cache_size: usize,
    /// Default TTL for NORMAL/LOW priority entries.
    pub default_ttl: Duration,
    /// Default TTL for HIGH/CRITICAL priority entries.
    pub high_priority_ttl: Duration,
    /// Interval between background expiry sweeps.
    pub cleanup_interval: Duration,
    /// Whether the cold tier is expected to survive process restarts.
    /// The cache itself is in-memory only; a caller that needs real
    /// persistence snapshots [`crate::cache::PeerCache::cached_peers`] to
    /// its own store and repopulates via [`crate::cache::PeerCache::warm_cache`]
    /// on startup. This flag is surfaced on statistics as a hint to that
    /// caller, not enforced by the cache.
    pub persistence_enabled: bool,
    /// Whether a caller persisting cold-tier entries (see
    /// `persistence_enabled`) should compress them. Opaque to the cache;
    /// carried through to statistics only.
    pub compression_enabled: bool,
    /// Eviction policy applied when the hot tier is over `max_memory_cache_size`.
    pub eviction_policy: EvictionPolicy,
    /// Fraction reputation decays by every 24h.
    pub reputation_decay_rate: f64,
    /// Cap on retained `ConnectionAttempt`s per peer.
    pub connection_history_size: usize,
    /// Whether [`crate::discovery::DiscoveryOrchestrator::start`] routes
    /// its bootstrap-peer bulk insert through
    /// [`crate::cache::PeerCache::warm_cache`] instead of inserting each
    /// peer individually. Either way, every bootstrap peer ends up flagged
    /// (`bootstrap_flag = true`, spec.md §4.3), unconditionally.
    pub auto_warming_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_cache_size: 500,
            max_disk_cache_size: 2000,
            default_ttl: Duration::from_secs(24 * 3600),
            high_priority_ttl: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(3600),
            persistence_enabled: true,
            compression_enabled: true,
            eviction_policy: EvictionPolicy::LruWithReputation,
            reputation_decay_rate: 0.1,
            connection_history_size: 10,
            auto_warming_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dht_config_validates() {
        assert!(DhtConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_k_is_rejected() {
        let mut cfg = DhtConfig::default();
        cfg.k = 0;
        assert!(matches!(cfg.validate(), Err(DhtError::ConfigInvalid(_))));
    }
}
