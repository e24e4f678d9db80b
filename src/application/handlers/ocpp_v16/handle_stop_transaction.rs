//! StopTransaction handler

use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{error, info};

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;

pub async fn handle_stop_transaction(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: StopTransactionRequest = parse_request(handler, "StopTransaction", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        transaction_id = req.transaction_id,
        meter_stop = req.meter_stop,
        reason = ?req.reason,
        "StopTransaction"
    );

    match handler
        .dlm
        .stop_transaction(
            &handler.charge_point_id,
            req.transaction_id,
            req.meter_stop,
            req.reason.as_ref().map(|r| format!("{:?}", r)),
        )
        .await
    {
        Ok(Some(transaction)) => {
            handler.identity.book_transaction(&transaction).await;
        }
        Ok(None) => {}
        Err(e) => error!(
            charge_point_id = handler.charge_point_id.as_str(),
            transaction_id = req.transaction_id,
            error = %e,
            "Failed to stop transaction"
        ),
    }

    // The station has already ended the session; always acknowledge.
    to_payload(&StopTransactionResponse {
        id_tag_info: req.id_tag.as_ref().map(|_| IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }),
    })
}
