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

//! Hot-tier eviction policies for [`crate::cache::PeerCache`] (spec.md §4.4).

use super::CachedPeer;
use serde::{Deserialize, Serialize};

/// Selects which metric ranks hot-tier entries for eviction. The
/// lowest-ranked non-CRITICAL entry is evicted first; CRITICAL entries are
/// never ranked (excluded from the candidate set entirely).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Least-recently-accessed first.
    Lru,
    /// Fewest accesses first.
    Lfu,
    /// Soonest-to-expire first.
    TtlExpirySoonest,
    /// Lowest reputation first.
    LowestReputation,
    /// Weighted hybrid of reputation, frequency, recency, and TTL headroom —
    /// spec.md §3's score formula.
    LruWithReputation,
    /// Greatest network distance first.
    NetworkDistance,
}

/// Rank `entry` under `policy` at time `now_ms`; lower is evicted first.
///
/// All variants but [`EvictionPolicy::LruWithReputation`] return a single
/// comparable quantity monotone with "evict first"; `LruWithReputation`
/// returns `-score` so every policy shares the same "lower ranks first"
/// convention.
pub fn rank(entry: &CachedPeer, policy: EvictionPolicy, now_ms: u64) -> f64 {
    match policy {
        EvictionPolicy::Lru => -(now_ms.saturating_sub(entry.last_accessed_ms) as f64),
        EvictionPolicy::Lfu => -(entry.access_count as f64),
        EvictionPolicy::TtlExpirySoonest => {
            let remaining = entry.ttl_remaining_ms(now_ms);
            -(remaining as f64)
        }
        EvictionPolicy::LowestReputation => entry.reputation,
        EvictionPolicy::LruWithReputation => -entry.score(now_ms),
        EvictionPolicy::NetworkDistance => -(entry.network_distance as f64),
    }
}

/// Pick the peer_id of the lowest-ranked non-CRITICAL entry among
/// `candidates`, or `None` if every candidate is CRITICAL.
pub fn select_eviction_victim<'a>(
    candidates: impl Iterator<Item = &'a CachedPeer>,
    policy: EvictionPolicy,
    now_ms: u64,
) -> Option<String> {
    candidates
        .filter(|c| !c.is_critical())
        .min_by(|a, b| {
            rank(a, policy, now_ms)
                .partial_cmp(&rank(b, policy, now_ms))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|c| c.peer.peer_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Priority;
    use crate::peer::Peer;

    fn peer(id: &str) -> Peer {
        Peer {
            peer_id: id.to_string(),
            address: "127.0.0.1:1".parse().unwrap(),
            connected: false,
            last_seen_ms: 0,
        }
    }

    #[test]
    fn critical_entries_are_never_selected() {
        let now = 1_000_000_000;
        let critical = CachedPeer::new(peer("critical"), Priority::Critical, None, now);
        let normal = CachedPeer::new(peer("normal"), Priority::Normal, None, now);
        let victim = select_eviction_victim(
            [&critical, &normal].into_iter(),
            EvictionPolicy::LruWithReputation,
            now,
        );
        assert_eq!(victim, Some("normal".to_string()));
    }

    #[test]
    fn all_critical_yields_no_victim() {
        let now = 1_000_000_000;
        let a = CachedPeer::new(peer("a"), Priority::Critical, None, now);
        let b = CachedPeer::new(peer("b"), Priority::Critical, None, now);
        assert_eq!(
            select_eviction_victim([&a, &b].into_iter(), EvictionPolicy::Lru, now),
            None
        );
    }

    #[test]
    fn lfu_prefers_lowest_access_count() {
        let now = 1_000_000_000;
        let mut low = CachedPeer::new(peer("low"), Priority::Normal, None, now);
        let mut high = CachedPeer::new(peer("high"), Priority::Normal, None, now);
        low.access_count = 1;
        high.access_count = 50;
        let victim =
            select_eviction_victim([&low, &high].into_iter(), EvictionPolicy::Lfu, now);
        assert_eq!(victim, Some("low".to_string()));
    }
}
