//! OCPP 1.6 message handler
//!
//! Parses raw OCPP-J frames, dispatches calls to action handlers and feeds
//! responses to pending outbound commands. Handlers never touch fleet state
//! directly: everything goes to the DLM engine as a message.

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::application::commands::SharedCommandSender;
use crate::application::dlm::DlmHandle;
use crate::application::handlers::ocpp_v16::{action_matcher, ActionError};
use crate::application::identity::SharedIdentityService;
use crate::support::ocpp_frame::OcppFrame;

/// Handler for one station's OCPP 1.6 session
pub struct OcppHandlerV16 {
    pub charge_point_id: String,
    pub dlm: DlmHandle,
    pub identity: SharedIdentityService,
    pub command_sender: SharedCommandSender,
    /// Heartbeat interval handed out in BootNotification (s)
    pub heartbeat_interval: u32,
}

impl OcppHandlerV16 {
    pub fn new(
        charge_point_id: impl Into<String>,
        dlm: DlmHandle,
        identity: SharedIdentityService,
        command_sender: SharedCommandSender,
        heartbeat_interval: u32,
    ) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            dlm,
            identity,
            command_sender,
            heartbeat_interval,
        }
    }

    /// Handle one text frame; returns the frame to send back, if any.
    pub async fn handle(&self, text: &str) -> Option<String> {
        let frame = match OcppFrame::parse(text) {
            Ok(f) => f,
            Err(e) => {
                error!(
                    charge_point_id = self.charge_point_id.as_str(),
                    error = %e,
                    raw = text,
                    "Failed to parse OCPP message"
                );
                return None;
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => Some(self.handle_call(&unique_id, &action, payload).await),

            OcppFrame::CallResult { unique_id, payload } => {
                self.command_sender
                    .handle_response(&self.charge_point_id, &unique_id, payload);
                None
            }

            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    message_id = unique_id.as_str(),
                    error_code = error_code.as_str(),
                    "Received CallError"
                );
                self.command_sender.handle_error(
                    &self.charge_point_id,
                    &unique_id,
                    &error_code,
                    &error_description,
                );
                None
            }
        }
    }

    async fn handle_call(&self, unique_id: &str, action: &str, payload: Value) -> String {
        debug!(charge_point_id = self.charge_point_id.as_str(), action, "Received Call");
        metrics::counter!("ocpp_messages_received_total", "action" => action.to_string()).increment(1);

        let response = match action_matcher(self, action, &payload).await {
            Ok(payload) => OcppFrame::result(unique_id, payload),
            Err(ActionError { code, description }) => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action,
                    code = code.as_str(),
                    description = description.as_str(),
                    "Answering with CallError"
                );
                OcppFrame::error_response(unique_id, code, description)
            }
        };
        response.serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::create_command_sender;
    use crate::application::dlm::pusher::tests::ScriptedStation;
    use crate::application::dlm::{ConfigurationPusher, DlmEngine, Fleet};
    use crate::application::events::create_event_bus;
    use crate::application::identity::IdentityService;
    use crate::application::session::SessionRegistry;
    use crate::config::{DlmConfig, GroupsConfig, PusherConfig};
    use crate::domain::{ChargingMode, Identity, IdentityBook};
    use crate::support::shutdown::ShutdownSignal;
    use serde_json::json;
    use std::time::Duration;

    async fn station(id: &str) -> (OcppHandlerV16, ShutdownSignal) {
        let config = DlmConfig::default();
        let pusher = ConfigurationPusher::shared(ScriptedStation::with(&[]), PusherConfig::default());
        let (engine, dlm) = DlmEngine::new(
            Fleet::new(config.clone(), GroupsConfig::default()),
            pusher,
            create_event_bus(),
            config,
        );
        let shutdown = ShutdownSignal::new();
        tokio::spawn(engine.run(shutdown.clone()));
        dlm.connect(id, None).await.unwrap();

        let mut book = IdentityBook::default();
        book.cards.insert("04AB12".into(), Identity::authorized());
        let handler = OcppHandlerV16::new(
            id,
            dlm,
            IdentityService::shared(book),
            create_command_sender(SessionRegistry::shared(), Duration::from_secs(1)),
            300,
        );
        (handler, shutdown)
    }

    async fn call(handler: &OcppHandlerV16, action: &str, payload: Value) -> OcppFrame {
        let text = OcppFrame::call("m1", action, payload).serialize();
        let reply = handler.handle(&text).await.expect("calls are always answered");
        OcppFrame::parse(&reply).unwrap()
    }

    fn payload(frame: OcppFrame) -> Value {
        match frame {
            OcppFrame::CallResult { payload, .. } => payload,
            other => panic!("expected CallResult, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn boot_notification_hands_out_interval() {
        let (handler, shutdown) = station("A001").await;
        let reply = payload(
            call(
                &handler,
                "BootNotification",
                json!({"chargePointVendor": "V", "chargePointModel": "M"}),
            )
            .await,
        );
        assert_eq!(reply["status"], json!("Accepted"));
        assert_eq!(reply["interval"], json!(300));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn unknown_action_is_not_implemented() {
        let (handler, shutdown) = station("A001").await;
        match call(&handler, "ReserveNow", json!({})).await {
            OcppFrame::CallError { error_code, .. } => assert_eq!(error_code, "NotImplemented"),
            other => panic!("expected CallError, got {:?}", other),
        }
        shutdown.trigger();
    }

    #[tokio::test]
    async fn malformed_payload_is_formation_violation() {
        let (handler, shutdown) = station("A001").await;
        match call(&handler, "StartTransaction", json!({"connectorId": "one"})).await {
            OcppFrame::CallError { error_code, .. } => assert_eq!(error_code, "FormationViolation"),
            other => panic!("expected CallError, got {:?}", other),
        }
        shutdown.trigger();
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let (handler, shutdown) = station("A001").await;

        let auth = payload(call(&handler, "Authorize", json!({"idTag": "04AB12"})).await);
        assert_eq!(auth["idTagInfo"]["status"], json!("Accepted"));
        let unknown = payload(call(&handler, "Authorize", json!({"idTag": "FFFF"})).await);
        assert_eq!(unknown["idTagInfo"]["status"], json!("Blocked"));

        let start = json!({
            "connectorId": 1,
            "idTag": "04AB12",
            "meterStart": 1000,
            "timestamp": "2024-01-01T10:00:00Z"
        });
        let started = payload(call(&handler, "StartTransaction", start.clone()).await);
        let transaction_id = started["transactionId"].as_i64().unwrap();
        assert!(transaction_id > 0);

        let busy = payload(call(&handler, "StartTransaction", start).await);
        assert_eq!(busy["idTagInfo"]["status"], json!("ConcurrentTx"));

        let cp = handler.dlm.charge_point("A001").await.unwrap().unwrap();
        assert_eq!(cp.mode, ChargingMode::Standby);

        payload(
            call(
                &handler,
                "StopTransaction",
                json!({
                    "transactionId": transaction_id,
                    "idTag": "04AB12",
                    "meterStop": 4500,
                    "timestamp": "2024-01-01T11:00:00Z"
                }),
            )
            .await,
        );
        let cp = handler.dlm.charge_point("A001").await.unwrap().unwrap();
        assert_eq!(cp.mode, ChargingMode::DoneCharging);
        assert_eq!(cp.current_transaction, None);

        let book = handler.identity.snapshot().await;
        assert_eq!(book.cards["04AB12"].energy_charged, 3500);
        shutdown.trigger();
    }

    #[tokio::test]
    async fn call_result_is_not_answered() {
        let (handler, shutdown) = station("A001").await;
        let text = OcppFrame::result("CS-1", json!({"status": "Accepted"})).serialize();
        assert!(handler.handle(&text).await.is_none());
        assert!(handler.handle("not json").await.is_none());
        shutdown.trigger();
    }
}
