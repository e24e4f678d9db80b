//! Heartbeat handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use serde_json::Value;
use tracing::debug;

use super::{to_payload, ActionResult};
use crate::application::OcppHandlerV16;

pub async fn handle_heartbeat(handler: &OcppHandlerV16, _payload: &Value) -> ActionResult {
    debug!(charge_point_id = handler.charge_point_id.as_str(), "Heartbeat");

    to_payload(&HeartbeatResponse {
        current_time: Utc::now(),
    })
}
