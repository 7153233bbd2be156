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

//! Kademlia-style peer discovery for a decentralized overlay network.
//!
//! This crate is split into three layers: a [`dht`] engine providing the
//! Kademlia operations themselves (store/find_value/find_node/ping), a
//! [`routing_table`] of XOR-distance k-buckets the engine consults and
//! maintains, and a [`discovery`] orchestrator that drives bootstrap,
//! periodic lookups, and a two-tier [`cache`] of known peers on top of the
//! engine. A typed [`events`] bus carries observable state transitions
//! across all three layers to application subscribers.
//!
//! Callers bring their own [`dht::Transport`] — this crate has no socket
//! code of its own; [`dht::LoopbackNetwork`] is provided for tests and
//! single-process simulation.

pub mod cache;
pub mod config;
pub mod dht;
pub mod discovery;
pub mod error;
pub mod events;
pub mod node;
pub mod peer;
pub mod routing_table;

pub use cache::{CacheStatistics, CachedPeer, EvictionPolicy, PeerCache, Priority};
pub use config::{CacheConfig, DhtConfig, DiscoveryConfig, MIN_VIABLE_PEERS};
pub use dht::{Dht, DhtMessage, DhtStatistics, InboundSink, LoopbackNetwork, LoopbackTransport, LookupResult, Operation, Transport};
pub use discovery::{DiscoveryOrchestrator, DiscoveryStatistics, NetworkStatus};
pub use error::{DhtError, DhtResult};
pub use events::{Callback, CallbackPriority, Event, EventBus, EventBusStatistics, EventKind, Filter, Severity};
pub use node::{Distance, Node, NodeId};
pub use peer::Peer;
pub use routing_table::RoutingTable;

/// Install a `tracing_subscriber::fmt` global subscriber honoring `RUST_LOG`
/// (defaulting to `info,overlay_discovery=debug`), matching the init block
/// every teacher binary runs at startup. A no-op if a subscriber is already
/// installed — callers embedding this crate alongside their own logging
/// setup should skip calling this and install their own subscriber instead.
pub fn init_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,overlay_discovery=debug".to_string()),
        )
        .with_target(false)
        .try_init();
}
