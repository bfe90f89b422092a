//! Connection registry: indexed bookkeeping and filtered fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use pulse_core::defaults;

use crate::connection::{ClientType, Connection};
use crate::filter::MessageFilter;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Connections idle longer than this are dropped by the stale sweep.
    pub stale_timeout_mins: u64,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_timeout_mins: defaults::STALE_CONNECTION_TIMEOUT_MINS,
            event_capacity: defaults::REGISTRY_EVENT_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PULSE_STALE_TIMEOUT_MINS` | `30` | Idle cutoff for the stale sweep |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let stale_timeout_mins = std::env::var("PULSE_STALE_TIMEOUT_MINS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.stale_timeout_mins);
        Self {
            stale_timeout_mins,
            ..defaults
        }
    }

    pub fn with_stale_timeout_mins(mut self, mins: u64) -> Self {
        self.stale_timeout_mins = mins;
        self
    }
}

/// Connection lifecycle event for registered listeners.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Connected {
        client_id: String,
        client_type: ClientType,
    },
    Disconnected {
        client_id: String,
        client_type: ClientType,
    },
}

/// Options for [`ConnectionRegistry::connect`].
#[derive(Debug, Default, Clone)]
pub struct ConnectOptions {
    pub client_id: Option<String>,
    pub subject_id: Option<String>,
    pub room: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn with_subject_id(mut self, id: impl Into<String>) -> Self {
        self.subject_id = Some(id.into());
        self
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub by_type: HashMap<String, usize>,
    pub messages_sent: u64,
    pub messages_filtered: u64,
}

#[derive(Default)]
struct Indexes {
    connections: HashMap<String, Arc<Connection>>,
    rooms: HashMap<String, HashSet<String>>,
    by_type: HashMap<ClientType, HashSet<String>>,
}

impl Indexes {
    fn insert(&mut self, conn: Arc<Connection>) {
        self.rooms
            .entry(conn.room.clone())
            .or_default()
            .insert(conn.client_id.clone());
        self.by_type
            .entry(conn.client_type)
            .or_default()
            .insert(conn.client_id.clone());
        self.connections.insert(conn.client_id.clone(), conn);
    }

    fn remove(&mut self, client_id: &str) -> Option<Arc<Connection>> {
        let conn = self.connections.remove(client_id)?;
        if let Some(room) = self.rooms.get_mut(&conn.room) {
            room.remove(client_id);
            if room.is_empty() {
                self.rooms.remove(&conn.room);
            }
        }
        if let Some(typed) = self.by_type.get_mut(&conn.client_type) {
            typed.remove(client_id);
            if typed.is_empty() {
                self.by_type.remove(&conn.client_type);
            }
        }
        Some(conn)
    }
}

/// Registry of live client connections with filtered send and broadcast.
///
/// All mutation goes through this type; the indices are never exposed
/// mutably. Broadcasts iterate a snapshot of the target id set so a
/// concurrent connect or disconnect never invalidates an in-flight fan-out.
pub struct ConnectionRegistry {
    indexes: RwLock<Indexes>,
    filter: MessageFilter,
    events: broadcast::Sender<RegistryEvent>,
    messages_sent: AtomicU64,
    messages_filtered: AtomicU64,
    config: RegistryConfig,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            indexes: RwLock::new(Indexes::default()),
            filter: MessageFilter,
            events,
            messages_sent: AtomicU64::new(0),
            messages_filtered: AtomicU64::new(0),
            config,
        }
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a client and send its `connection_established` confirmation.
    ///
    /// An existing connection under the same id is disconnected first, so a
    /// reconnect never orphans the previous socket. The confirmation frame
    /// bypasses filtering: every client type gets one.
    pub async fn connect(
        &self,
        client_type: ClientType,
        tx: mpsc::Sender<String>,
        opts: ConnectOptions,
    ) -> String {
        let client_id = opts
            .client_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let room = opts.room.unwrap_or_else(|| "default".to_string());
        let conn = Arc::new(Connection::new(
            client_id.clone(),
            client_type,
            opts.subject_id,
            room.clone(),
            opts.metadata.unwrap_or_else(|| json!({})),
            tx,
        ));

        let confirmation = json!({
            "type": "connection_established",
            "client_id": client_id,
            "client_type": client_type.as_str(),
            "room": room,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = conn.send_text(confirmation.to_string()) {
            warn!(client_id = %client_id, error = %e, "confirmation send failed");
        }

        // Check-and-replace happens under one write lock so two concurrent
        // connects with the same id can never both pass the existence check
        // and leak the loser's room/type index entries.
        let replaced = {
            let mut indexes = self.indexes.write().await;
            let prior = indexes.remove(&client_id);
            indexes.insert(conn);
            prior
        };
        if let Some(prior) = replaced {
            debug!(client_id = %client_id, "replaced existing connection");
            let _ = self.events.send(RegistryEvent::Disconnected {
                client_id: prior.client_id.clone(),
                client_type: prior.client_type,
            });
        }
        let _ = self.events.send(RegistryEvent::Connected {
            client_id: client_id.clone(),
            client_type,
        });
        info!(
            client_id = %client_id,
            client_type = %client_type,
            room = %room,
            "client connected"
        );
        client_id
    }

    /// Remove a client. Idempotent: an unknown id returns `false`.
    pub async fn disconnect(&self, client_id: &str) -> bool {
        let removed = self.indexes.write().await.remove(client_id);
        match removed {
            Some(conn) => {
                let _ = self.events.send(RegistryEvent::Disconnected {
                    client_id: conn.client_id.clone(),
                    client_type: conn.client_type,
                });
                info!(
                    client_id = %conn.client_id,
                    client_type = %conn.client_type,
                    "client disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver a message to one client, subject to filtering.
    ///
    /// Returns `false` when the client is unknown, the filter rejects the
    /// message, or the transport fails. A transport failure disconnects the
    /// client.
    pub async fn send_to_client(&self, client_id: &str, message: &JsonValue) -> bool {
        let conn = {
            let indexes = self.indexes.read().await;
            match indexes.connections.get(client_id) {
                Some(conn) => conn.clone(),
                None => return false,
            }
        };

        if !self.filter.should_send(message, &conn) {
            self.messages_filtered.fetch_add(1, Ordering::Relaxed);
            trace!(client_id = %client_id, "message filtered");
            return false;
        }

        match conn.send_text(message.to_string()) {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(
                    client_id = %client_id,
                    error = %e,
                    "send failed, disconnecting client"
                );
                self.disconnect(client_id).await;
                false
            }
        }
    }

    /// Broadcast to every client in a room. Returns the delivery count.
    pub async fn broadcast_to_room(&self, room: &str, message: &JsonValue) -> usize {
        let ids: Vec<String> = {
            let indexes = self.indexes.read().await;
            indexes
                .rooms
                .get(room)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default()
        };
        self.fan_out(ids, message).await
    }

    /// Broadcast to every client of a type. Returns the delivery count.
    pub async fn broadcast_to_type(&self, client_type: ClientType, message: &JsonValue) -> usize {
        let ids: Vec<String> = {
            let indexes = self.indexes.read().await;
            indexes
                .by_type
                .get(&client_type)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default()
        };
        self.fan_out(ids, message).await
    }

    /// Broadcast to every connected client. Returns the delivery count.
    pub async fn broadcast_to_all(&self, message: &JsonValue) -> usize {
        let ids: Vec<String> = {
            let indexes = self.indexes.read().await;
            indexes.connections.keys().cloned().collect()
        };
        self.fan_out(ids, message).await
    }

    async fn fan_out(&self, ids: Vec<String>, message: &JsonValue) -> usize {
        let mut delivered = 0;
        for id in ids {
            if self.send_to_client(&id, message).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Disconnect every connection idle longer than the configured timeout.
    /// Returns how many were dropped.
    pub async fn cleanup_stale_connections(&self) -> usize {
        self.cleanup_stale_with_timeout(self.config.stale_timeout_mins)
            .await
    }

    /// Stale sweep with an explicit idle cutoff in minutes.
    pub async fn cleanup_stale_with_timeout(&self, timeout_mins: u64) -> usize {
        let timeout = Duration::from_secs(timeout_mins * 60);
        let stale: Vec<String> = {
            let indexes = self.indexes.read().await;
            indexes
                .connections
                .values()
                .filter(|c| c.is_stale(timeout))
                .map(|c| c.client_id.clone())
                .collect()
        };

        let mut dropped = 0;
        for client_id in stale {
            if self.disconnect(&client_id).await {
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(dropped, "stale connections cleaned up");
        }
        dropped
    }

    /// Record client liveness for an inbound frame.
    pub async fn touch(&self, client_id: &str) {
        if let Some(conn) = self.indexes.read().await.connections.get(client_id) {
            conn.touch();
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.indexes.read().await.connections.len()
    }

    pub async fn count_by_type(&self, client_type: ClientType) -> usize {
        self.indexes
            .read()
            .await
            .by_type
            .get(&client_type)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn stats(&self) -> RegistryStats {
        let indexes = self.indexes.read().await;
        let by_type = indexes
            .by_type
            .iter()
            .map(|(t, ids)| (t.as_str().to_string(), ids.len()))
            .collect();
        RegistryStats {
            total_connections: indexes.connections.len(),
            by_type,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_filtered: self.messages_filtered.load(Ordering::Relaxed),
        }
    }
}
