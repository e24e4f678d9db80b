//! v1.6 ChangeConfiguration command

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::application::ports::GenericStatus;

pub async fn change_configuration(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    key: &str,
    value: &str,
) -> Result<GenericStatus, CommandError> {
    info!(charge_point_id, key, value, "v1.6 ChangeConfiguration");

    let request = ChangeConfigurationRequest {
        key: key.to_string(),
        value: value.to_string(),
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, "ChangeConfiguration", payload)
        .await?;

    let response: ChangeConfigurationResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(GenericStatus::from_str(&format!("{:?}", response.status)))
}
