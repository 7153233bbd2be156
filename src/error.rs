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

//! Error taxonomy for the peer-discovery core.
//!
//! `DhtError` is the public error type returned from fallible operations on
//! the DHT engine, routing table, peer cache, discovery orchestrator, and
//! event bus. Internal plumbing (message parsing, transport adapters
//! supplied by tests) is free to use `anyhow::Result` and convert into this
//! enum at the public boundary, the same split `dht.bak` used between
//! `anyhow::Result` internals and structured statuses at the edges.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the peer-discovery core's public contracts.
#[derive(Debug, Error)]
pub enum DhtError {
    /// A configuration value was outside its documented range. Fatal to
    /// `start()`; never raised after startup.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A transient send/receive failure on one specific peer. Recovered
    /// locally; the affected operation fails only for that peer.
    #[error("transport error contacting {target}: {reason}")]
    Transport {
        /// Hex-rendered node id of the peer that failed.
        target: String,
        /// Human-readable failure reason from the transport.
        reason: String,
    },

    /// A request exceeded its `ping_timeout`.
    #[error("request to {target} timed out after {elapsed:?}")]
    Timeout {
        /// Hex-rendered node id of the peer that did not respond.
        target: String,
        /// How long the caller waited before giving up.
        elapsed: Duration,
    },

    /// A lookup completed without locating the requested value. Not
    /// treated as an error by callers; surfaced as `found = false`.
    #[error("key not found")]
    NotFound,

    /// The owning component was shut down while the operation was in
    /// flight.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A subscriber callback raised while handling an event. The callback
    /// stays registered; this variant only carries the failure forward so
    /// it can be re-emitted as a `DiscoveryError` event.
    #[error("callback failed: {0}")]
    CallbackFailure(String),

    /// A maintenance iteration (bucket refresh, republish, cache sweep,
    /// reputation decay) failed. The next scheduled iteration still runs.
    #[error("maintenance iteration skipped: {0}")]
    MaintenanceSkipped(String),
}

/// Convenience alias used throughout the public API.
pub type DhtResult<T> = Result<T, DhtError>;
