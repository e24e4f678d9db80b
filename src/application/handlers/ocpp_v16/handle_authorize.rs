//! Authorize handler

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{info, warn};

use super::{parse_request, to_payload, ActionResult};
use crate::application::OcppHandlerV16;
use crate::domain::IdTagStatus;

pub async fn handle_authorize(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: AuthorizeRequest = parse_request(handler, "Authorize", payload)?;

    let status = handler.identity.authorize(&req.id_tag).await;
    info!(
        charge_point_id = handler.charge_point_id.as_str(),
        id_tag = req.id_tag.as_str(),
        %status,
        "Authorize"
    );

    // A presented tag starts a fresh observation window for the engine.
    if let Err(e) = handler.dlm.reset_counters(&handler.charge_point_id).await {
        warn!(charge_point_id = handler.charge_point_id.as_str(), error = %e, "Counter reset not delivered");
    }

    to_payload(&AuthorizeResponse {
        id_tag_info: IdTagInfo {
            status: authorization_status(status),
            expiry_date: None,
            parent_id_tag: None,
        },
    })
}

pub(crate) fn authorization_status(status: IdTagStatus) -> AuthorizationStatus {
    match status {
        IdTagStatus::Accepted => AuthorizationStatus::Accepted,
        IdTagStatus::Blocked => AuthorizationStatus::Blocked,
        IdTagStatus::Expired => AuthorizationStatus::Expired,
    }
}
