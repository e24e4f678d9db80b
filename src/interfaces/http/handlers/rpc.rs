//! Operator JSON-RPC
//!
//! `POST /api` with `{"id": 1, "method": "...", "params": ["..."]}`. Every
//! reply is `{"id", "jsonrpc": "2.0", "result"}`; failures are reported as a
//! string result, the way operator dashboards already expect them.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::application::dlm::{DlmHandle, SystemState};
use crate::application::identity::SharedIdentityService;
use crate::application::ports::{GenericStatus, SharedChargePointCommands};
use crate::application::services::StateKeeper;
use crate::domain::IdentityBook;

/// Tag used for operator-initiated starts without an id tag.
pub const REMOTE_START_DEFAULT_TAG: &str = "remoteStartNoIDSet";

#[derive(Clone)]
pub struct ApiState {
    pub dlm: DlmHandle,
    pub commands: SharedChargePointCommands,
    pub identity: SharedIdentityService,
    pub keeper: StateKeeper,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RpcReply {
    pub id: Value,
    pub jsonrpc: &'static str,
    pub result: Value,
}

#[derive(Serialize)]
struct SystemStateReply {
    #[serde(flatten)]
    state: SystemState,
    identities: IdentityBook,
}

pub fn server_header() -> String {
    format!("OCPP-API-SERVER/{}", env!("CARGO_PKG_VERSION"))
}

pub async fn rpc_handler(State(state): State<ApiState>, Json(request): Json<RpcRequest>) -> Response {
    metrics::counter!("api_requests_total", "method" => request.method.clone()).increment(1);
    let reply = dispatch(&state, request).await;
    ([(header::SERVER, server_header())], Json(reply)).into_response()
}

pub async fn dispatch(state: &ApiState, request: RpcRequest) -> RpcReply {
    info!(method = request.method.as_str(), params = ?request.params, "API call");
    let result = match request.method.as_str() {
        "getChargePoints" => get_charge_points(state).await,
        "getSystemState" => get_system_state(state).await,
        "remoteStartTransaction" => remote_start(state, &request.params).await,
        "remoteStopTransaction" => remote_stop(state, &request.params).await,
        "unlockConnector" => unlock_connector(state, &request.params).await,
        "overridePowerTarget" => override_power_target(state, &request.params).await,
        "clearPowerOverride" => clear_power_override(state, &request.params).await,
        "resetDlm" => reset_dlm(state, &request.params).await,
        "setGroupLockout" => set_group_lockout(state, &request.params).await,
        "clearActionPending" => clear_action_pending(state, &request.params).await,
        "savePersistence" => save_persistence(state).await,
        other => {
            warn!(method = other, "Unknown API method");
            Ok(json!("unknownMethod"))
        }
    };

    RpcReply {
        id: request.id,
        jsonrpc: "2.0",
        result: result.unwrap_or_else(Value::String),
    }
}

type RpcResult = Result<Value, String>;

fn ok() -> RpcResult {
    Ok(json!("true"))
}

fn exactly(params: &[String], count: usize) -> Result<(), String> {
    if params.len() == count {
        Ok(())
    } else if count == 1 {
        Err("Need exactly 1 argument".to_string())
    } else {
        Err(format!("Need exactly {} params of type string", count))
    }
}

fn first(params: &[String]) -> Result<&str, String> {
    params
        .first()
        .map(String::as_str)
        .ok_or_else(|| "Need a charge point id".to_string())
}

fn to_value<T: Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

fn status_result(status: GenericStatus) -> RpcResult {
    if status.is_accepted() {
        ok()
    } else {
        Ok(json!(status.to_string()))
    }
}

async fn get_charge_points(state: &ApiState) -> RpcResult {
    let charge_points = state.dlm.charge_points().await.map_err(|e| e.to_string())?;
    to_value(&charge_points)
}

async fn get_system_state(state: &ApiState) -> RpcResult {
    let system = state.dlm.system_state().await.map_err(|e| e.to_string())?;
    to_value(&SystemStateReply {
        state: system,
        identities: state.identity.snapshot().await,
    })
}

async fn remote_start(state: &ApiState, params: &[String]) -> RpcResult {
    let charge_point_id = first(params)?;
    let id_tag = params
        .get(1)
        .map(String::as_str)
        .unwrap_or(REMOTE_START_DEFAULT_TAG);
    let status = state
        .commands
        .remote_start_transaction(charge_point_id, id_tag, None)
        .await
        .map_err(|e| e.to_string())?;
    status_result(status)
}

async fn remote_stop(state: &ApiState, params: &[String]) -> RpcResult {
    exactly(params, 1)?;
    let charge_point_id = &params[0];
    let cp = state
        .dlm
        .charge_point(charge_point_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Unknown charge point {}", charge_point_id))?;
    let transaction_id = cp
        .current_transaction
        .ok_or_else(|| "No active transaction".to_string())?;
    let status = state
        .commands
        .remote_stop_transaction(charge_point_id, transaction_id)
        .await
        .map_err(|e| e.to_string())?;
    status_result(status)
}

async fn unlock_connector(state: &ApiState, params: &[String]) -> RpcResult {
    let charge_point_id = first(params)?;
    let connector_id = match params.get(1) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| format!("Invalid connector id {}", raw))?,
        None => 1,
    };
    match state.commands.unlock_connector(charge_point_id, connector_id).await {
        Ok(status) => Ok(json!(status.to_string())),
        Err(e) => {
            warn!(charge_point_id, connector_id, error = %e, "Unlock failed");
            Err("ERROR".to_string())
        }
    }
}

async fn override_power_target(state: &ApiState, params: &[String]) -> RpcResult {
    exactly(params, 2)?;
    let amps = params[1]
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid current {}", params[1]))?;
    state
        .dlm
        .override_power_target(&params[0], amps)
        .await
        .map_err(|e| e.to_string())?;
    ok()
}

async fn clear_power_override(state: &ApiState, params: &[String]) -> RpcResult {
    exactly(params, 1)?;
    state
        .dlm
        .clear_power_override(&params[0])
        .await
        .map_err(|e| e.to_string())?;
    ok()
}

async fn reset_dlm(state: &ApiState, params: &[String]) -> RpcResult {
    exactly(params, 1)?;
    state
        .dlm
        .reset_counters(&params[0])
        .await
        .map_err(|e| e.to_string())?;
    ok()
}

async fn set_group_lockout(state: &ApiState, params: &[String]) -> RpcResult {
    exactly(params, 2)?;
    let locked = params[1]
        .trim()
        .parse::<bool>()
        .map_err(|_| format!("Expected true or false, got {}", params[1]))?;
    state
        .dlm
        .set_group_lockout(&params[0], locked)
        .await
        .map_err(|e| e.to_string())?;
    ok()
}

async fn clear_action_pending(state: &ApiState, params: &[String]) -> RpcResult {
    exactly(params, 1)?;
    state
        .dlm
        .clear_action_pending(&params[0])
        .await
        .map_err(|e| e.to_string())?;
    ok()
}

async fn save_persistence(state: &ApiState) -> RpcResult {
    state.keeper.save_now().await.map_err(|e| e.to_string())?;
    ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dlm::pusher::tests::ScriptedStation;
    use crate::application::dlm::{ConfigurationPusher, DlmEngine, Fleet};
    use crate::application::events::create_event_bus;
    use crate::application::identity::IdentityService;
    use crate::application::ports::SharedStateStore;
    use crate::config::{DlmConfig, GroupsConfig, PusherConfig};
    use crate::domain::{ConnectorStatus, PhaseCurrents};
    use crate::infrastructure::JsonFileStore;
    use crate::support::shutdown::ShutdownSignal;
    use std::sync::Arc;

    fn api() -> (ApiState, ShutdownSignal) {
        api_at(std::env::temp_dir().join(format!("ocpp-dlm-rpc-{}", std::process::id())))
    }

    fn api_at(dir: std::path::PathBuf) -> (ApiState, ShutdownSignal) {
        let station = ScriptedStation::with(&[]);
        let config = DlmConfig::default();
        let pusher = ConfigurationPusher::shared(station.clone(), PusherConfig::default());
        let (engine, dlm) = DlmEngine::new(
            Fleet::new(config.clone(), GroupsConfig::default()),
            pusher,
            create_event_bus(),
            config,
        );
        let shutdown = ShutdownSignal::new();
        tokio::spawn(engine.run(shutdown.clone()));

        let identity = IdentityService::shared(IdentityBook::default());
        let store: SharedStateStore = Arc::new(JsonFileStore::new(
            dir.join("centralsystem.json"),
            dir.join("ident.json"),
        ));
        let keeper = StateKeeper::new(store, dlm.clone(), identity.clone());
        (
            ApiState {
                dlm,
                commands: station,
                identity,
                keeper,
            },
            shutdown,
        )
    }

    async fn call(state: &ApiState, method: &str, params: &[&str]) -> Value {
        dispatch(
            state,
            RpcRequest {
                id: json!(7),
                method: method.to_string(),
                params: params.iter().map(|p| p.to_string()).collect(),
            },
        )
        .await
        .result
    }

    #[tokio::test]
    async fn unknown_method() {
        let (state, shutdown) = api();
        let reply = dispatch(
            &state,
            RpcRequest {
                id: json!(3),
                method: "rebootEverything".into(),
                params: vec![],
            },
        )
        .await;
        assert_eq!(reply.id, json!(3));
        assert_eq!(reply.jsonrpc, "2.0");
        assert_eq!(reply.result, json!("unknownMethod"));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn lists_charge_points_and_state() {
        let (state, shutdown) = api();
        state.dlm.connect("A001", None).await.unwrap();

        let list = call(&state, "getChargePoints", &[]).await;
        assert_eq!(list[0]["id"], json!("A001"));

        let system = call(&state, "getSystemState", &[]).await;
        assert!(system["groups"].is_array());
        assert!(system["identities"]["cards"].is_object());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn remote_stop_needs_a_session() {
        let (state, shutdown) = api();
        state.dlm.connect("A001", None).await.unwrap();

        assert_eq!(call(&state, "remoteStopTransaction", &[]).await, json!("Need exactly 1 argument"));
        assert_eq!(
            call(&state, "remoteStopTransaction", &["A001"]).await,
            json!("No active transaction")
        );

        state
            .dlm
            .start_transaction("A001", 1, "04AB12", 0)
            .await
            .unwrap();
        assert_eq!(call(&state, "remoteStopTransaction", &["A001"]).await, json!("true"));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn unlock_defaults_to_connector_one() {
        let (state, shutdown) = api();
        assert_eq!(call(&state, "unlockConnector", &["A001"]).await, json!("Unlocked"));
        assert_eq!(
            call(&state, "unlockConnector", &["A001", "x"]).await,
            json!("Invalid connector id x")
        );
        shutdown.trigger();
    }

    #[tokio::test]
    async fn override_and_lockout() {
        let (state, shutdown) = api();
        state.dlm.connect("A001", None).await.unwrap();
        state
            .dlm
            .status_notification("A001", 1, ConnectorStatus::Charging, None, None)
            .await
            .unwrap();

        assert_eq!(
            call(&state, "overridePowerTarget", &["A001"]).await,
            json!("Need exactly 2 params of type string")
        );
        assert_eq!(call(&state, "overridePowerTarget", &["A001", "10"]).await, json!("true"));
        let cp = state.dlm.charge_point("A001").await.unwrap().unwrap();
        assert_eq!(cp.current_targeted, PhaseCurrents::uniform(10));
        assert_eq!(call(&state, "clearPowerOverride", &["A001"]).await, json!("true"));

        assert_eq!(call(&state, "setGroupLockout", &["A", "true"]).await, json!("true"));
        assert_eq!(
            call(&state, "setGroupLockout", &["A", "maybe"]).await,
            json!("Expected true or false, got maybe")
        );
        assert!(call(&state, "clearActionPending", &["Z"]).await.as_str().is_some_and(|s| s.contains("Z")));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn save_persistence_writes_files() {
        let dir = std::env::temp_dir().join(format!("ocpp-dlm-rpc-save-{}", std::process::id()));
        let (state, shutdown) = api_at(dir.clone());
        assert_eq!(call(&state, "savePersistence", &[]).await, json!("true"));
        assert!(dir.join("centralsystem.json").is_file());
        assert!(dir.join("ident.json").is_file());
        shutdown.trigger();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn server_header_carries_version() {
        assert_eq!(
            server_header(),
            format!("OCPP-API-SERVER/{}", env!("CARGO_PKG_VERSION"))
        );
    }
}
