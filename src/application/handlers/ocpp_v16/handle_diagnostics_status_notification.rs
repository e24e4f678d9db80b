//! DiagnosticsStatusNotification handler

use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;

pub async fn handle_diagnostics_status_notification(
    handler: &OcppHandlerV16,
    payload: &Value,
) -> ActionResult {
    let req: DiagnosticsStatusNotificationRequest =
        parse_request(handler, "DiagnosticsStatusNotification", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        status = ?req.status,
        "DiagnosticsStatusNotification"
    );

    to_payload(&DiagnosticsStatusNotificationResponse {})
}
