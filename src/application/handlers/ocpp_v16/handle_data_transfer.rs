//! DataTransfer handler

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::types::DataTransferStatus;
use serde_json::Value;
use tracing::info;

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;

pub async fn handle_data_transfer(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: DataTransferRequest = parse_request(handler, "DataTransfer", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        vendor_id = req.vendor_string.as_str(),
        message_id = ?req.message_id,
        data = ?req.data,
        "DataTransfer"
    );

    to_payload(&DataTransferResponse {
        status: DataTransferStatus::Accepted,
        data: None,
    })
}
