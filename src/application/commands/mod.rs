//! Commands from the central system to charge points
//!
//! ```text
//! DLM pusher / provisioning / operator API
//!            │
//!            ▼
//!   CommandDispatcher (ChargePointCommands)
//!            │  build typed rust_ocpp request
//!            ▼
//!   CommandSender ── [2, id, action, payload] ──► SessionRegistry ──► socket
//!            ▲
//!            └── CallResult / CallError routed back by message id
//! ```

pub mod dispatcher;
pub mod v16;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::session::SharedSessionRegistry;
use crate::support::ocpp_frame::OcppFrame;

pub use dispatcher::CommandDispatcher;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingRequest {
    action_name: String,
    response_sender: oneshot::Sender<Result<Value, CommandError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Charge point not connected: {0}")]
    NotConnected(String),
    #[error("Failed to send: {0}")]
    SendFailed(String),
    #[error("Response timeout")]
    Timeout,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },
}

/// Sends calls to charge points and correlates their responses
pub struct CommandSender {
    session_registry: SharedSessionRegistry,
    pending_requests: DashMap<(String, String), PendingRequest>,
    message_counter: AtomicU64,
    response_timeout: Duration,
}

impl CommandSender {
    pub fn new(session_registry: SharedSessionRegistry, response_timeout: Duration) -> Self {
        Self {
            session_registry,
            pending_requests: DashMap::new(),
            message_counter: AtomicU64::new(1),
            response_timeout,
        }
    }

    fn generate_message_id(&self) -> String {
        let id = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("CS-{}", id)
    }

    /// Send `action` with `payload` and wait for the station's response payload.
    pub async fn send_command(
        &self,
        charge_point_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value, CommandError> {
        let message_id = self.generate_message_id();
        let json = OcppFrame::call(message_id.clone(), action, payload).serialize();

        let (tx, rx) = oneshot::channel();
        let key = (charge_point_id.to_string(), message_id.clone());
        self.pending_requests.insert(
            key.clone(),
            PendingRequest {
                action_name: action.to_string(),
                response_sender: tx,
            },
        );

        debug!(charge_point_id, action, message_id = message_id.as_str(), "Sending command");

        if let Err(e) = self.session_registry.send_to(charge_point_id, json) {
            self.pending_requests.remove(&key);
            return Err(CommandError::NotConnected(e));
        }

        match timeout(self.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending_requests.remove(&key);
                Err(CommandError::InvalidResponse("Channel closed".to_string()))
            }
            Err(_) => {
                self.pending_requests.remove(&key);
                warn!(
                    charge_point_id,
                    action,
                    message_id = message_id.as_str(),
                    "Command timed out"
                );
                Err(CommandError::Timeout)
            }
        }
    }

    pub fn handle_response(&self, charge_point_id: &str, message_id: &str, payload: Value) {
        let key = (charge_point_id.to_string(), message_id.to_string());
        if let Some((_, pending)) = self.pending_requests.remove(&key) {
            debug!(
                charge_point_id,
                action = pending.action_name.as_str(),
                message_id,
                "Received response"
            );
            let _ = pending.response_sender.send(Ok(payload));
        } else {
            warn!(charge_point_id, message_id, "Response for unknown request");
        }
    }

    pub fn handle_error(
        &self,
        charge_point_id: &str,
        message_id: &str,
        error_code: &str,
        error_description: &str,
    ) {
        let key = (charge_point_id.to_string(), message_id.to_string());
        if let Some((_, pending)) = self.pending_requests.remove(&key) {
            warn!(
                charge_point_id,
                action = pending.action_name.as_str(),
                message_id,
                error_code,
                error_description,
                "Received error"
            );
            let _ = pending.response_sender.send(Err(CommandError::CallError {
                code: error_code.to_string(),
                description: error_description.to_string(),
            }));
        }
    }

    /// Fail every outstanding call to a station whose socket closed.
    pub fn cleanup_charge_point(&self, charge_point_id: &str) {
        let keys: Vec<_> = self
            .pending_requests
            .iter()
            .filter(|entry| entry.key().0 == charge_point_id)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, pending)) = self.pending_requests.remove(&key) {
                let _ = pending
                    .response_sender
                    .send(Err(CommandError::NotConnected(charge_point_id.to_string())));
            }
        }
        info!(charge_point_id, "Cleared pending commands");
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }
}

pub type SharedCommandSender = Arc<CommandSender>;

pub fn create_command_sender(
    session_registry: SharedSessionRegistry,
    response_timeout: Duration,
) -> SharedCommandSender {
    Arc::new(CommandSender::new(session_registry, response_timeout))
}
