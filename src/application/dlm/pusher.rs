//! Configuration pusher: commits a three-phase limit to a station.
//!
//! Phases are set one at a time through `ChangeConfiguration`. The first
//! phase that is rejected or not confirmed in time aborts the push; the caller
//! only records the limit as assigned when all three were confirmed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::application::commands::CommandError;
use crate::application::ports::{GenericStatus, SharedChargePointCommands};
use crate::config::PusherConfig;
use crate::domain::{Phase, PhaseCurrents};

#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("phase {phase} rejected by station ({status})")]
    Rejected { phase: Phase, status: GenericStatus },

    #[error("phase {phase} not confirmed within {deadline:?}")]
    Timeout { phase: Phase, deadline: Duration },

    #[error("phase {phase} could not be sent: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: CommandError,
    },
}

impl PushError {
    /// Phase that failed; later phases were not attempted.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Rejected { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::Transport { phase, .. } => *phase,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
        }
    }
}

pub struct ConfigurationPusher {
    commands: SharedChargePointCommands,
    config: PusherConfig,
    /// Serialises pushes to the same station
    station_locks: DashMap<String, Arc<Mutex<()>>>,
}

pub type SharedConfigurationPusher = Arc<ConfigurationPusher>;

impl ConfigurationPusher {
    pub fn new(commands: SharedChargePointCommands, config: PusherConfig) -> Self {
        Self {
            commands,
            config,
            station_locks: DashMap::new(),
        }
    }

    pub fn shared(commands: SharedChargePointCommands, config: PusherConfig) -> SharedConfigurationPusher {
        Arc::new(Self::new(commands, config))
    }

    fn station_lock(&self, charge_point_id: &str) -> Arc<Mutex<()>> {
        self.station_locks
            .entry(charge_point_id.to_string())
            .or_default()
            .clone()
    }

    /// Push `limits` to the station, phase by phase, all or nothing.
    pub async fn push(&self, charge_point_id: &str, limits: PhaseCurrents) -> Result<(), PushError> {
        let lock = self.station_lock(charge_point_id);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let result = self.push_phases(charge_point_id, limits).await;

        let outcome = match &result {
            Ok(()) => {
                info!(charge_point_id, %limits, "Limit confirmed on all phases");
                "ok"
            }
            Err(e) => {
                warn!(charge_point_id, %limits, phase = %e.phase(), error = %e, "Limit push failed");
                e.outcome()
            }
        };
        metrics::counter!("dlm_pushes_total", "outcome" => outcome).increment(1);
        metrics::histogram!("dlm_push_duration_seconds").record(start.elapsed().as_secs_f64());
        result
    }

    async fn push_phases(&self, charge_point_id: &str, limits: PhaseCurrents) -> Result<(), PushError> {
        let deadline = self.config.phase_deadline();

        for phase in Phase::ALL {
            let key = self.config.phase_key(phase.number());
            let value = limits.get(phase).to_string();

            let confirmation = timeout(
                deadline,
                self.commands.change_configuration(charge_point_id, &key, &value),
            )
            .await;

            match confirmation {
                Err(_) | Ok(Err(CommandError::Timeout)) => {
                    return Err(PushError::Timeout { phase, deadline });
                }
                Ok(Err(source)) => return Err(PushError::Transport { phase, source }),
                Ok(Ok(status)) if status.is_accepted() => {}
                Ok(Ok(status)) => return Err(PushError::Rejected { phase, status }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::ports::{ChargePointCommands, TriggerType};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Scripted station: per-key outcomes, everything else accepted.
    #[derive(Default)]
    pub(crate) struct ScriptedStation {
        pub outcomes: StdMutex<HashMap<String, Outcome>>,
        pub sent: StdMutex<Vec<(String, String, String)>>,
    }

    #[derive(Clone)]
    pub(crate) enum Outcome {
        Status(GenericStatus),
        Hang,
        Fail(CommandError),
    }

    impl ScriptedStation {
        pub fn with(outcomes: &[(&str, Outcome)]) -> Arc<Self> {
            let station = Self::default();
            {
                let mut map = station.outcomes.lock().unwrap();
                for (key, outcome) in outcomes {
                    map.insert(key.to_string(), outcome.clone());
                }
            }
            Arc::new(station)
        }

        pub fn sent_keys(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, k, _)| k.clone()).collect()
        }
    }

    #[async_trait]
    impl ChargePointCommands for ScriptedStation {
        async fn change_configuration(
            &self,
            charge_point_id: &str,
            key: &str,
            value: &str,
        ) -> Result<GenericStatus, CommandError> {
            self.sent.lock().unwrap().push((
                charge_point_id.to_string(),
                key.to_string(),
                value.to_string(),
            ));
            let outcome = self.outcomes.lock().unwrap().get(key).cloned();
            match outcome {
                None => Ok(GenericStatus::Accepted),
                Some(Outcome::Status(status)) => Ok(status),
                Some(Outcome::Fail(e)) => Err(e),
                Some(Outcome::Hang) => std::future::pending().await,
            }
        }

        async fn unlock_connector(&self, _: &str, _: u32) -> Result<GenericStatus, CommandError> {
            Ok(GenericStatus::Unlocked)
        }

        async fn remote_start_transaction(
            &self,
            _: &str,
            _: &str,
            _: Option<u32>,
        ) -> Result<GenericStatus, CommandError> {
            Ok(GenericStatus::Accepted)
        }

        async fn remote_stop_transaction(&self, _: &str, _: i32) -> Result<GenericStatus, CommandError> {
            Ok(GenericStatus::Accepted)
        }

        async fn trigger_message(
            &self,
            _: &str,
            _: TriggerType,
            _: Option<u32>,
        ) -> Result<GenericStatus, CommandError> {
            Ok(GenericStatus::Accepted)
        }
    }

    fn pusher(station: Arc<ScriptedStation>) -> ConfigurationPusher {
        ConfigurationPusher::new(station, PusherConfig::default())
    }

    #[tokio::test]
    async fn all_phases_confirmed() {
        let station = ScriptedStation::with(&[]);
        let result = pusher(station.clone())
            .push("A001", PhaseCurrents::uniform(16))
            .await;
        assert!(result.is_ok());
        assert_eq!(
            station.sent_keys(),
            vec![
                "DlmOperatorPhase1Limit",
                "DlmOperatorPhase2Limit",
                "DlmOperatorPhase3Limit"
            ]
        );
        assert!(station.sent.lock().unwrap().iter().all(|(_, _, v)| v == "16"));
    }

    #[tokio::test]
    async fn phase_one_rejection_stops_push() {
        let station = ScriptedStation::with(&[(
            "DlmOperatorPhase1Limit",
            Outcome::Status(GenericStatus::Rejected),
        )]);
        let err = pusher(station.clone())
            .push("A001", PhaseCurrents::uniform(16))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Phase::L1);
        assert!(matches!(err, PushError::Rejected { .. }));
        assert_eq!(station.sent_keys(), vec!["DlmOperatorPhase1Limit"]);
    }

    #[tokio::test]
    async fn phase_two_not_supported_stops_before_phase_three() {
        let station = ScriptedStation::with(&[(
            "DlmOperatorPhase2Limit",
            Outcome::Status(GenericStatus::NotSupported),
        )]);
        let err = pusher(station.clone())
            .push("A001", PhaseCurrents::uniform(6))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Phase::L2);
        assert_eq!(station.sent_keys().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_phase_times_out_after_deadline() {
        let station = ScriptedStation::with(&[("DlmOperatorPhase3Limit", Outcome::Hang)]);
        let started = tokio::time::Instant::now();
        let err = pusher(station)
            .push("A001", PhaseCurrents::uniform(6))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Timeout { phase: Phase::L3, .. }));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transport_error_carries_phase() {
        let station = ScriptedStation::with(&[(
            "DlmOperatorPhase1Limit",
            Outcome::Fail(CommandError::NotConnected("A001".into())),
        )]);
        let err = pusher(station)
            .push("A001", PhaseCurrents::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Transport { phase: Phase::L1, .. }));
    }
}
