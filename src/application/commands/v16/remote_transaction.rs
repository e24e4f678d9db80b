//! v1.6 RemoteStartTransaction / RemoteStopTransaction commands

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use serde_json::{json, Value};
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::application::ports::GenericStatus;

pub async fn remote_start_transaction(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    id_tag: &str,
    connector_id: Option<u32>,
) -> Result<GenericStatus, CommandError> {
    info!(charge_point_id, id_tag, ?connector_id, "v1.6 RemoteStartTransaction");

    let mut payload = json!({ "idTag": id_tag });
    if let Some(connector_id) = connector_id {
        payload["connectorId"] = json!(connector_id);
    }

    let result = command_sender
        .send_command(charge_point_id, "RemoteStartTransaction", payload)
        .await?;

    status_of(&result)
}

pub async fn remote_stop_transaction(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    transaction_id: i32,
) -> Result<GenericStatus, CommandError> {
    info!(charge_point_id, transaction_id, "v1.6 RemoteStopTransaction");

    let request = RemoteStopTransactionRequest { transaction_id };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, "RemoteStopTransaction", payload)
        .await?;

    let response: RemoteStopTransactionResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(GenericStatus::from_str(&format!("{:?}", response.status)))
}

fn status_of(result: &Value) -> Result<GenericStatus, CommandError> {
    result
        .get("status")
        .and_then(Value::as_str)
        .map(GenericStatus::from_str)
        .ok_or_else(|| CommandError::InvalidResponse("missing status".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_read_from_payload() {
        assert_eq!(
            status_of(&json!({"status": "Rejected"})).unwrap(),
            GenericStatus::Rejected
        );
        assert!(status_of(&json!({})).is_err());
    }
}
