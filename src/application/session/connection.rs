//! WebSocket connection abstraction

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// An open WebSocket session to a charge point
#[derive(Debug)]
pub struct Connection {
    /// Distinguishes successive connections of the same station
    pub connection_id: u64,
    pub charge_point_id: String,
    /// Outbound frames, drained by the socket writer task
    pub sender: mpsc::UnboundedSender<String>,
    pub remote_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        connection_id: u64,
        charge_point_id: impl Into<String>,
        sender: mpsc::UnboundedSender<String>,
        remote_addr: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            charge_point_id: charge_point_id.into(),
            sender,
            remote_addr,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn send(&self, message: String) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|e| format!("Failed to send message: {}", e))
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

// ── Tests ──────────────────────────────────────────────────────
