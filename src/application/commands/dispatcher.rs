//! Production [`ChargePointCommands`] over the OCPP 1.6 transport.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::{v16, CommandError, SharedCommandSender};
use crate::application::ports::{ChargePointCommands, GenericStatus, TriggerType};

fn record_command_latency(action: &'static str, start: Instant, ok: bool) {
    metrics::histogram!("ocpp_command_latency_seconds", "action" => action)
        .record(start.elapsed().as_secs_f64());
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!("ocpp_commands_total", "action" => action, "outcome" => outcome)
        .increment(1);
}

pub struct CommandDispatcher {
    command_sender: SharedCommandSender,
}

impl CommandDispatcher {
    pub fn new(command_sender: SharedCommandSender) -> Self {
        Self { command_sender }
    }

    pub fn shared(command_sender: SharedCommandSender) -> Arc<Self> {
        Arc::new(Self::new(command_sender))
    }
}

#[async_trait]
impl ChargePointCommands for CommandDispatcher {
    async fn change_configuration(
        &self,
        charge_point_id: &str,
        key: &str,
        value: &str,
    ) -> Result<GenericStatus, CommandError> {
        let start = Instant::now();
        let result =
            v16::change_configuration(&self.command_sender, charge_point_id, key, value).await;
        record_command_latency("change_configuration", start, result.is_ok());
        result
    }

    async fn unlock_connector(
        &self,
        charge_point_id: &str,
        connector_id: u32,
    ) -> Result<GenericStatus, CommandError> {
        let start = Instant::now();
        let result = v16::unlock_connector(&self.command_sender, charge_point_id, connector_id).await;
        record_command_latency("unlock_connector", start, result.is_ok());
        result
    }

    async fn remote_start_transaction(
        &self,
        charge_point_id: &str,
        id_tag: &str,
        connector_id: Option<u32>,
    ) -> Result<GenericStatus, CommandError> {
        let start = Instant::now();
        let result = v16::remote_start_transaction(
            &self.command_sender,
            charge_point_id,
            id_tag,
            connector_id,
        )
        .await;
        record_command_latency("remote_start", start, result.is_ok());
        result
    }

    async fn remote_stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<GenericStatus, CommandError> {
        let start = Instant::now();
        let result =
            v16::remote_stop_transaction(&self.command_sender, charge_point_id, transaction_id)
                .await;
        record_command_latency("remote_stop", start, result.is_ok());
        result
    }

    async fn trigger_message(
        &self,
        charge_point_id: &str,
        requested_message: TriggerType,
        connector_id: Option<u32>,
    ) -> Result<GenericStatus, CommandError> {
        let start = Instant::now();
        let result = v16::trigger_message(
            &self.command_sender,
            charge_point_id,
            requested_message,
            connector_id,
        )
        .await;
        record_command_latency("trigger_message", start, result.is_ok());
        result
    }
}
