//! Session registry: open charge point WebSocket connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::connection::Connection;

/// Thread-safe registry of active OCPP sessions, one per station id
pub struct SessionRegistry {
    sessions: DashMap<String, Connection>,
    next_connection_id: AtomicU64,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register a connection, replacing any older one for the same station.
    /// Returns the new connection id.
    pub fn register(
        &self,
        charge_point_id: &str,
        sender: mpsc::UnboundedSender<String>,
        remote_addr: Option<String>,
    ) -> u64 {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let connection = Connection::new(connection_id, charge_point_id, sender, remote_addr);
        if let Some(old) = self.sessions.insert(charge_point_id.to_string(), connection) {
            warn!(
                charge_point_id,
                evicted_connection = old.connection_id,
                "Replaced existing session"
            );
        }
        info!(charge_point_id, connection_id, "Registered charge point session");
        connection_id
    }

    /// Remove the session if it is still `connection_id`. Returns true when removed.
    pub fn unregister(&self, charge_point_id: &str, connection_id: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, conn| conn.connection_id == connection_id)
            .is_some();
        if removed {
            info!(charge_point_id, connection_id, "Unregistered charge point session");
        }
        removed
    }

    pub fn send_to(&self, charge_point_id: &str, message: String) -> Result<(), String> {
        match self.sessions.get(charge_point_id) {
            Some(conn) => conn.send(message),
            None => Err(format!("Charge point {} not connected", charge_point_id)),
        }
    }

    pub fn touch(&self, charge_point_id: &str) {
        if let Some(mut conn) = self.sessions.get_mut(charge_point_id) {
            conn.touch();
        }
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_send() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("A001", tx, None);

        assert!(registry.is_connected("A001"));
        registry.send_to("A001", "frame".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "frame");
        assert!(registry.send_to("B001", "frame".into()).is_err());
    }

    #[test]
    fn stale_unregister_keeps_newer_session() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let first = registry.register("A001", tx1, None);
        let second = registry.register("A001", tx2, None);

        assert!(!registry.unregister("A001", first));
        assert!(registry.is_connected("A001"));
        assert!(registry.unregister("A001", second));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn connected_ids_lists_all() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("A001", tx.clone(), None);
        registry.register("B001", tx, None);
        let mut ids = registry.connected_ids();
        ids.sort();
        assert_eq!(ids, vec!["A001".to_string(), "B001".to_string()]);
    }
}
