//! FirmwareStatusNotification handler

use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;

pub async fn handle_firmware_status_notification(
    handler: &OcppHandlerV16,
    payload: &Value,
) -> ActionResult {
    let req: FirmwareStatusNotificationRequest =
        parse_request(handler, "FirmwareStatusNotification", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        status = ?req.status,
        "FirmwareStatusNotification"
    );

    to_payload(&FirmwareStatusNotificationResponse {})
}
