//! Client connection record and type taxonomy.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use pulse_core::{Error, Result};

/// Role of a connected client, driving message filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Student,
    Instructor,
    Dashboard,
    Admin,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Student => "student",
            ClientType::Instructor => "instructor",
            ClientType::Dashboard => "dashboard",
            ClientType::Admin => "admin",
        }
    }
}

impl FromStr for ClientType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "student" => Ok(ClientType::Student),
            "instructor" => Ok(ClientType::Instructor),
            "dashboard" => Ok(ClientType::Dashboard),
            "admin" => Ok(ClientType::Admin),
            other => Err(Error::Validation(format!("unknown client type: {other}"))),
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered client.
///
/// Outbound messages go through a bounded mpsc channel whose receiving end
/// is owned by the socket's write task. Sends never block: a full channel
/// is treated as a transport failure so slow consumers cannot stall
/// broadcasts.
pub struct Connection {
    pub client_id: String,
    pub client_type: ClientType,
    /// Identity used by per-student filtering.
    pub subject_id: Option<String>,
    pub room: String,
    pub metadata: JsonValue,
    pub connected_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
    tx: mpsc::Sender<String>,
}

impl Connection {
    pub fn new(
        client_id: String,
        client_type: ClientType,
        subject_id: Option<String>,
        room: String,
        metadata: JsonValue,
        tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            client_id,
            client_type,
            subject_id,
            room,
            metadata,
            connected_at: Utc::now(),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            tx,
        }
    }

    /// Queue a text frame for delivery, updating liveness on success.
    pub fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .try_send(text)
            .map_err(|e| Error::Transport(format!("client {}: {e}", self.client_id)))?;
        self.touch();
        Ok(())
    }

    /// Record client liveness (inbound frame, pong, successful send).
    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        let elapsed_ms = Utc::now().timestamp_millis()
            - self.last_activity_ms.load(Ordering::Relaxed);
        elapsed_ms > timeout.as_millis() as i64
    }
}
