//! OCPP 1.6 Action handlers
//!
//! Routes OCPP 1.6 action names to their respective handlers.
//! Payloads are deserialized into `rust_ocpp::v1_6` types within each handler.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, warn};

use crate::application::OcppHandlerV16;
use crate::support::ocpp_frame::OcppErrorCode;

mod handle_authorize;
mod handle_boot_notification;
mod handle_data_transfer;
mod handle_diagnostics_status_notification;
mod handle_firmware_status_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

pub use handle_authorize::handle_authorize;
pub use handle_boot_notification::handle_boot_notification;
pub use handle_data_transfer::handle_data_transfer;
pub use handle_diagnostics_status_notification::handle_diagnostics_status_notification;
pub use handle_firmware_status_notification::handle_firmware_status_notification;
pub use handle_heartbeat::handle_heartbeat;
pub use handle_meter_values::{handle_meter_values, readings_from};
pub use handle_start_transaction::handle_start_transaction;
pub use handle_status_notification::{connector_status, handle_status_notification};
pub use handle_stop_transaction::handle_stop_transaction;

/// Answer for a call that cannot be handled; sent as a CallError.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionError {
    pub code: OcppErrorCode,
    pub description: String,
}

impl ActionError {
    pub fn new(code: OcppErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

pub type ActionResult = Result<Value, ActionError>;

/// Deserialize a request payload, mapping failures to FormationViolation.
pub(crate) fn parse_request<T: DeserializeOwned>(
    handler: &OcppHandlerV16,
    action: &str,
    payload: &Value,
) -> Result<T, ActionError> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        error!(
            charge_point_id = handler.charge_point_id.as_str(),
            action,
            error = %e,
            "Failed to parse request"
        );
        ActionError::new(OcppErrorCode::FormationViolation, e.to_string())
    })
}

pub(crate) fn to_payload<T: serde::Serialize>(response: &T) -> ActionResult {
    serde_json::to_value(response)
        .map_err(|e| ActionError::new(OcppErrorCode::InternalError, e.to_string()))
}

/// Routes OCPP 1.6 actions to their respective handlers.
pub async fn action_matcher(handler: &OcppHandlerV16, action: &str, payload: &Value) -> ActionResult {
    match action {
        "Authorize" => handle_authorize(handler, payload).await,
        "BootNotification" => handle_boot_notification(handler, payload).await,
        "DataTransfer" => handle_data_transfer(handler, payload).await,
        "DiagnosticsStatusNotification" => {
            handle_diagnostics_status_notification(handler, payload).await
        }
        "FirmwareStatusNotification" => handle_firmware_status_notification(handler, payload).await,
        "Heartbeat" => handle_heartbeat(handler, payload).await,
        "MeterValues" => handle_meter_values(handler, payload).await,
        "StartTransaction" => handle_start_transaction(handler, payload).await,
        "StatusNotification" => handle_status_notification(handler, payload).await,
        "StopTransaction" => handle_stop_transaction(handler, payload).await,

        unknown => {
            if is_cs_to_cp_action(unknown) {
                warn!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    action = unknown,
                    "Received CS→CP action from charge point"
                );
            } else {
                error!(
                    charge_point_id = handler.charge_point_id.as_str(),
                    action = unknown,
                    "Unknown OCPP 1.6 action"
                );
            }
            Err(ActionError::new(
                OcppErrorCode::NotImplemented,
                format!("{} is not handled by this central system", unknown),
            ))
        }
    }
}

/// Actions only the central system may send.
fn is_cs_to_cp_action(action: &str) -> bool {
    matches!(
        action,
        "ChangeConfiguration"
            | "GetConfiguration"
            | "RemoteStartTransaction"
            | "RemoteStopTransaction"
            | "Reset"
            | "TriggerMessage"
            | "UnlockConnector"
    )
}
