//! StartTransaction handler

use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;
use crate::domain::DomainError;

pub async fn handle_start_transaction(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: StartTransactionRequest = parse_request(handler, "StartTransaction", payload)?;

    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = req.meter_start,
        "StartTransaction"
    );

    let (transaction_id, status) = match handler
        .dlm
        .start_transaction(
            &handler.charge_point_id,
            req.connector_id,
            &req.id_tag,
            req.meter_start,
        )
        .await
    {
        Ok(transaction) => (transaction.id, AuthorizationStatus::Accepted),
        Err(DomainError::ConnectorBusy { transaction_id, .. }) => {
            warn!(
                charge_point_id = handler.charge_point_id.as_str(),
                active_transaction = transaction_id,
                "Connector already has a transaction"
            );
            (0, AuthorizationStatus::ConcurrentTx)
        }
        Err(e) => {
            error!(
                charge_point_id = handler.charge_point_id.as_str(),
                error = %e,
                "Failed to start transaction"
            );
            (0, AuthorizationStatus::Invalid)
        }
    };

    to_payload(&StartTransactionResponse {
        transaction_id,
        id_tag_info: IdTagInfo {
            status,
            expiry_date: None,
            parent_id_tag: None,
        },
    })
}
