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

//! Typed event bus: priority-ordered dispatch, bounded history, replay
//! (spec.md §4.5).

use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Severity of a reported [`EventKind::DiscoveryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Variant-specific event payload. Carried inside [`Event`] alongside the
/// common `event_id`/`timestamp_ms` envelope fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventKind {
    PeerDiscovered { peer: Peer },
    PeerLost { peer_id: String },
    PeerConnected { peer_id: String },
    PeerDisconnected { peer_id: String },
    PeerStatusChanged { peer_id: String, connected: bool },
    DiscoveryStarted,
    DiscoveryStopped,
    DiscoveryError {
        message: String,
        cause: Option<String>,
        severity: Severity,
        recoverable: bool,
    },
    NetworkPartition { lost_peer_ids: Vec<String> },
    NetworkMerge { merged_peer_ids: Vec<String> },
    DHTOperation {
        operation: String,
        target: Option<String>,
        success: bool,
    },
}

impl EventKind {
    /// Runtime type tag used for typed-callback filtering and
    /// `type_filter` history queries — the "reflection modeled as a
    /// runtime tag" approach spec.md §9 calls for.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::PeerDiscovered { .. } => "PeerDiscovered",
            EventKind::PeerLost { .. } => "PeerLost",
            EventKind::PeerConnected { .. } => "PeerConnected",
            EventKind::PeerDisconnected { .. } => "PeerDisconnected",
            EventKind::PeerStatusChanged { .. } => "PeerStatusChanged",
            EventKind::DiscoveryStarted => "DiscoveryStarted",
            EventKind::DiscoveryStopped => "DiscoveryStopped",
            EventKind::DiscoveryError { .. } => "DiscoveryError",
            EventKind::NetworkPartition { .. } => "NetworkPartition",
            EventKind::NetworkMerge { .. } => "NetworkMerge",
            EventKind::DHTOperation { .. } => "DHTOperation",
        }
    }
}

/// A dispatched event: monotonic id, timestamp, and payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: u64,
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Serialize the event payload for an inspection endpoint or log line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Priority at which a callback is invoked relative to others on the same
/// event, highest first. Declared low-to-high so the derived `Ord` sorts
/// ascending; dispatch reverses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallbackPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// A registered event handler. Returning `Err` does not unregister the
/// callback — spec.md §4.5 requires the subscriber to stay registered and
/// the failure to be re-emitted as a `DiscoveryError`.
pub type Callback = Arc<dyn Fn(Event) -> Result<(), String> + Send + Sync>;
/// Predicate deciding whether a callback receives a given event.
pub type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct CallbackEntry {
    callback: Callback,
    priority: CallbackPriority,
    filter: Option<Filter>,
    async_flag: bool,
}

/// Point-in-time snapshot of event bus observables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusStatistics {
    pub events_emitted: u64,
    pub callbacks_executed: u64,
    pub avg_callback_latency_ms: f64,
    pub active_callback_count: usize,
    pub history_size: usize,
}

impl EventBusStatistics {
    /// Serialize the snapshot for logging or an inspection endpoint.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Default)]
struct Stats {
    events_emitted: u64,
    callbacks_executed: u64,
    callback_latencies_us: VecDeque<u64>,
}

const HISTORY_CAP: usize = 1000;
const REPLAY_WINDOW: usize = 100;
const LATENCY_RING: usize = 100;

struct Inner {
    history: RwLock<VecDeque<Event>>,
    broadcast_tx: broadcast::Sender<Event>,
    callbacks: RwLock<HashMap<Uuid, CallbackEntry>>,
    next_event_id: AtomicU64,
    stats: RwLock<Stats>,
    emit_tx: mpsc::UnboundedSender<Event>,
    stopped: AtomicBool,
}

/// Typed, ordered, priority-aware event delivery with bounded history and
/// replay (spec.md §4.5). Emission pushes to history, publishes to a
/// broadcast stream with a 100-event replay window, and queues the event
/// for the background dispatch task that drives registered callbacks.
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast_tx, _rx) = broadcast::channel(REPLAY_WINDOW);
        let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<Event>();
        let inner = Arc::new(Inner {
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAP)),
            broadcast_tx,
            callbacks: RwLock::new(HashMap::new()),
            next_event_id: AtomicU64::new(1),
            stats: RwLock::new(Stats::default()),
            emit_tx,
            stopped: AtomicBool::new(false),
        });

        let dispatch_inner = inner.clone();
        tokio::spawn(async move {
            while let Some(event) = emit_rx.recv().await {
                dispatch_inner.dispatch(event).await;
            }
        });

        Self { inner }
    }

    /// Assign `event_id`/`timestamp_ms`, record to history, publish, and
    /// queue for callback dispatch. A no-op after `shutdown()`.
    #[instrument(skip(self, kind))]
    pub async fn emit(&self, kind: EventKind) {
        if self.inner.stopped.load(AtomicOrdering::SeqCst) {
            warn!("emit after shutdown ignored: {}", kind.tag());
            return;
        }
        let event = Event {
            event_id: self.inner.next_event_id.fetch_add(1, AtomicOrdering::SeqCst),
            timestamp_ms: now_ms(),
            kind,
        };

        {
            let mut history = self.inner.history.write().await;
            history.push_back(event.clone());
            while history.len() > HISTORY_CAP {
                history.pop_front();
            }
        }
        self.inner.stats.write().await.events_emitted += 1;
        let _ = self.inner.broadcast_tx.send(event.clone());
        let _ = self.inner.emit_tx.send(event);
    }

    /// Register a callback. `filter` rejects events it returns `false` for.
    pub async fn register_callback(
        &self,
        callback: Callback,
        priority: CallbackPriority,
        filter: Option<Filter>,
        async_flag: bool,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.callbacks.write().await.insert(
            id,
            CallbackEntry {
                callback,
                priority,
                filter,
                async_flag,
            },
        );
        id
    }

    /// Register a callback invoked only for events whose tag matches
    /// `kind_tag` (the runtime-type-tag approach spec.md §9 calls for in
    /// place of source-language reflection).
    pub async fn register_typed_callback(
        &self,
        kind_tag: &'static str,
        callback: Callback,
        priority: CallbackPriority,
        async_flag: bool,
    ) -> Uuid {
        let filter: Filter = Arc::new(move |event: &Event| event.tag() == kind_tag);
        self.register_callback(callback, priority, Some(filter), async_flag)
            .await
    }

    pub async fn unregister_callback(&self, id: Uuid) -> bool {
        self.inner.callbacks.write().await.remove(&id).is_some()
    }

    /// Events matching `type_filter`/`since` (exclusive lower bound on
    /// `event_id`), most recent `limit` if given.
    pub async fn get_event_history(
        &self,
        type_filter: Option<&str>,
        since: Option<u64>,
        limit: Option<usize>,
    ) -> Vec<Event> {
        let history = self.inner.history.read().await;
        let mut matched: Vec<Event> = history
            .iter()
            .filter(|e| type_filter.map(|t| e.tag() == t).unwrap_or(true))
            .filter(|e| since.map(|s| e.event_id > s).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let start = matched.len().saturating_sub(limit);
            matched = matched.split_off(start);
        }
        matched
    }

    /// Replay matching historic events through a single already-registered
    /// callback, in original order, ignoring that callback's own filter.
    pub async fn replay_events(
        &self,
        callback_id: Uuid,
        type_filter: Option<&str>,
        since: Option<u64>,
    ) {
        let events = self.get_event_history(type_filter, since, None).await;
        let callback = {
            let callbacks = self.inner.callbacks.read().await;
            callbacks.get(&callback_id).map(|e| e.callback.clone())
        };
        let Some(callback) = callback else {
            warn!(%callback_id, "replay requested for unknown callback");
            return;
        };
        for event in events {
            if let Err(reason) = (callback)(event) {
                self.report_callback_failure(reason).await;
            }
        }
    }

    pub async fn statistics(&self) -> EventBusStatistics {
        let stats = self.inner.stats.read().await;
        let avg_us = if stats.callback_latencies_us.is_empty() {
            0.0
        } else {
            stats.callback_latencies_us.iter().sum::<u64>() as f64
                / stats.callback_latencies_us.len() as f64
        };
        EventBusStatistics {
            events_emitted: stats.events_emitted,
            callbacks_executed: stats.callbacks_executed,
            avg_callback_latency_ms: avg_us / 1000.0,
            active_callback_count: self.inner.callbacks.read().await.len(),
            history_size: self.inner.history.read().await.len(),
        }
    }

    pub async fn clear_history(&self) {
        self.inner.history.write().await.clear();
    }

    /// Idempotent: rejects further `emit()` calls, leaves in-flight
    /// callbacks to finish.
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, AtomicOrdering::SeqCst);
    }

    async fn report_callback_failure(&self, reason: String) {
        error!(%reason, "event bus callback failed");
        // Re-emitted directly (bypassing emit()'s shutdown guard would be
        // wrong even here) so a failure during shutdown is simply dropped.
        if self.inner.stopped.load(AtomicOrdering::SeqCst) {
            return;
        }
        let event = Event {
            event_id: self.inner.next_event_id.fetch_add(1, AtomicOrdering::SeqCst),
            timestamp_ms: now_ms(),
            kind: EventKind::DiscoveryError {
                message: format!("callback failed: {reason}"),
                cause: None,
                severity: Severity::Low,
                recoverable: true,
            },
        };
        self.inner.history.write().await.push_back(event.clone());
        let _ = self.inner.broadcast_tx.send(event.clone());
        let _ = self.inner.emit_tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    #[instrument(skip(self, event), fields(event_id = event.event_id, tag = event.tag()))]
    async fn dispatch(self: &Arc<Self>, event: Event) {
        let mut entries: Vec<(Uuid, CallbackPriority, Callback, bool)> = {
            let callbacks = self.callbacks.read().await;
            callbacks
                .iter()
                .filter(|(_, entry)| {
                    entry.filter.as_ref().map(|f| f(&event)).unwrap_or(true)
                })
                .map(|(id, entry)| (*id, entry.priority, entry.callback.clone(), entry.async_flag))
                .collect()
        };
        entries.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, _priority, callback, async_flag) in entries {
            if async_flag {
                let inner = self.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = (callback)(event);
                    inner.record_callback(started).await;
                    if let Err(reason) = result {
                        inner.report_callback_failure_detached(reason).await;
                    }
                });
            } else {
                let started = Instant::now();
                let result = (callback)(event.clone());
                self.record_callback(started).await;
                if let Err(reason) = result {
                    debug!(%id, "sync callback failed");
                    self.report_callback_failure_detached(reason).await;
                }
            }
        }
    }

    async fn record_callback(&self, started: Instant) {
        let mut stats = self.stats.write().await;
        stats.callbacks_executed += 1;
        stats
            .callback_latencies_us
            .push_back(started.elapsed().as_micros() as u64);
        while stats.callback_latencies_us.len() > LATENCY_RING {
            stats.callback_latencies_us.pop_front();
        }
    }

    async fn report_callback_failure_detached(self: &Arc<Self>, reason: String) {
        error!(%reason, "event bus callback failed");
        if self.stopped.load(AtomicOrdering::SeqCst) {
            return;
        }
        let event = Event {
            event_id: self.next_event_id.fetch_add(1, AtomicOrdering::SeqCst),
            timestamp_ms: now_ms(),
            kind: EventKind::DiscoveryError {
                message: format!("callback failed: {reason}"),
                cause: None,
                severity: Severity::Low,
                recoverable: true,
            },
        };
        self.history.write().await.push_back(event.clone());
        let _ = self.broadcast_tx.send(event.clone());
        let _ = self.emit_tx.send(event);
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
