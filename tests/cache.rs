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

//! PeerCache scenarios exercised through the public API only.

use overlay_discovery::{CacheConfig, Peer, PeerCache, Priority};
use std::collections::{HashMap, HashSet};

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

    cache.put(peer("p1"), Priority::Critical, None, HashSet::new(), HashMap::new()).await;
    for i in 2..=5 {
        cache.put(peer(&format!("p{i}")), Priority::Normal, None, HashSet::new(), HashMap::new()).await;
    }

    let p1 = cache.get("p1").await;
    assert!(p1.is_some());
    assert_eq!(p1.unwrap().peer.peer_id, "p1");
    assert!(cache.statistics().await.hot_size <= 3);
}

#[tokio::test]
async fn connection_history_cap_scenario() {
    // spec.md §8 scenario 6
    let mut config = CacheConfig::default();
    config.connection_history_size = 3;
    let cache = PeerCache::new(config);
    cache.put(peer("p"), Priority::Normal, None, HashSet::new(), HashMap::new()).await;

    for i in 0..4u32 {
        cache
            .record_connection_attempt("p", i % 2 == 0, 10 + i, None, "dial".to_string())
            .await;
    }

    let entry = cache.get("p").await.unwrap();
    assert_eq!(entry.connection_history.len(), 3);
}

#[tokio::test]
async fn reputation_bounds_hold_under_extremes() {
    let cache = PeerCache::new(CacheConfig::default());
    cache.put(peer("p"), Priority::Normal, None, HashSet::new(), HashMap::new()).await;

    for _ in 0..50 {
        cache.update_reputation("p", 10.0).await;
    }
    assert_eq!(cache.get("p").await.unwrap().reputation, 1.0);

    for _ in 0..50 {
        cache.update_reputation("p", -10.0).await;
    }
    assert_eq!(cache.get("p").await.unwrap().reputation, 0.0);
}

#[tokio::test]
async fn bootstrap_peers_are_queryable_by_flag() {
    let cache = PeerCache::new(CacheConfig::default());
    cache.put(peer("seed-1"), Priority::High, None, HashSet::new(), HashMap::new()).await;
    cache.put(peer("seed-2"), Priority::High, None, HashSet::new(), HashMap::new()).await;
    cache.put(peer("regular"), Priority::Normal, None, HashSet::new(), HashMap::new()).await;

    cache.set_bootstrap("seed-1", true).await;
    cache.set_bootstrap("seed-2", true).await;

    let bootstrap = cache.bootstrap_peers().await;
    assert_eq!(bootstrap.len(), 2);
    assert!(bootstrap.iter().all(|p| p.peer.peer_id.starts_with("seed")));
}

#[tokio::test]
async fn by_tags_and_by_reputation_filter_correctly() {
    let cache = PeerCache::new(CacheConfig::default());
    let mut tags = HashSet::new();
    tags.insert("relay".to_string());
    cache.put(peer("r1"), Priority::Normal, None, tags.clone(), HashMap::new()).await;
    cache.put(peer("r2"), Priority::Normal, None, HashSet::new(), HashMap::new()).await;

    let relays = cache.by_tags("relay").await;
    assert_eq!(relays.len(), 1);
    assert_eq!(relays[0].peer.peer_id, "r1");

    cache.update_reputation("r1", 0.5).await;
    let top = cache.by_reputation(1).await;
    assert_eq!(top[0].peer.peer_id, "r1");
}
