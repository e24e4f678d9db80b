//! Station provisioning
//!
//! Runs once per new connection, in its own task: configures metering,
//! nudges the station for a heartbeat and a diagnostics status, then parks
//! it at the safe limit 0/0/0 until the engine allocates current.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::commands::CommandError;
use crate::application::dlm::DlmHandle;
use crate::application::ports::{SharedChargePointCommands, TriggerType};
use crate::config::ProvisioningConfig;
use crate::domain::PhaseCurrents;

const SAMPLE_INTERVAL_KEY: &str = "MeterValueSampleInterval";
const SAMPLED_DATA_KEY: &str = "MeterValuesSampledData";

#[derive(Clone)]
pub struct Provisioner {
    commands: SharedChargePointCommands,
    dlm: DlmHandle,
    config: ProvisioningConfig,
}

pub type SharedProvisioner = Arc<Provisioner>;

impl Provisioner {
    pub fn new(commands: SharedChargePointCommands, dlm: DlmHandle, config: ProvisioningConfig) -> Self {
        Self { commands, dlm, config }
    }

    pub fn spawn(&self, charge_point_id: &str) -> JoinHandle<()> {
        let this = self.clone();
        let charge_point_id = charge_point_id.to_string();
        tokio::spawn(async move {
            match this.provision(&charge_point_id).await {
                Ok(()) => info!(charge_point_id = charge_point_id.as_str(), "Provisioning finished"),
                Err(e) => warn!(
                    charge_point_id = charge_point_id.as_str(),
                    error = %e,
                    "Provisioning aborted"
                ),
            }
        })
    }

    /// Walk the provisioning steps. Rejections are logged and skipped; a
    /// transport error means the station is gone and ends the run.
    pub async fn provision(&self, charge_point_id: &str) -> Result<(), CommandError> {
        let step = Duration::from_secs(self.config.step_delay_secs);

        tokio::time::sleep(step).await;
        self.configure(charge_point_id, SAMPLE_INTERVAL_KEY, &self.config.meter_sample_interval.to_string())
            .await?;

        tokio::time::sleep(step).await;
        self.configure(charge_point_id, SAMPLED_DATA_KEY, &self.config.meter_sampled_data)
            .await?;
        if let Err(e) = self.dlm.clear_telemetry(charge_point_id).await {
            warn!(charge_point_id, error = %e, "Could not reset telemetry");
        }

        tokio::time::sleep(step).await;
        self.trigger(charge_point_id, TriggerType::Heartbeat).await?;

        tokio::time::sleep(step).await;
        self.trigger(charge_point_id, TriggerType::DiagnosticsStatusNotification)
            .await?;

        tokio::time::sleep(step).await;
        match self.dlm.push_now(charge_point_id, PhaseCurrents::ZERO).await {
            Ok(()) => info!(charge_point_id, "Safe limit applied"),
            Err(e) => warn!(charge_point_id, error = %e, "Safe limit not applied, the engine will retry"),
        }
        Ok(())
    }

    async fn configure(&self, charge_point_id: &str, key: &str, value: &str) -> Result<(), CommandError> {
        let status = self
            .commands
            .change_configuration(charge_point_id, key, value)
            .await?;
        if status.is_accepted() {
            info!(charge_point_id, key, value, "Configuration set");
        } else {
            warn!(charge_point_id, key, %status, "Configuration not accepted");
        }
        Ok(())
    }

    async fn trigger(&self, charge_point_id: &str, message: TriggerType) -> Result<(), CommandError> {
        let status = self
            .commands
            .trigger_message(charge_point_id, message, None)
            .await?;
        if !status.is_accepted() {
            warn!(charge_point_id, ?message, %status, "Trigger not accepted");
        }
        Ok(())
    }
}
