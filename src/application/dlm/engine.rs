//! DLM engine actor
//!
//! A single task owns the [`Fleet`]. WebSocket handlers, the operator API,
//! provisioning and authorization talk to it through [`DlmHandle`]; no other
//! task touches charger or group state. Pushes run concurrently in a
//! `JoinSet`, bounded by a semaphore, and report back into the same loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::fleet::{Fleet, FleetSnapshot, MeterReading, PushRequest, SystemState};
use super::pusher::{PushError, SharedConfigurationPusher};
use crate::application::events::SharedEventBus;
use crate::config::DlmConfig;
use crate::domain::{ChargePoint, ConnectorStatus, DomainError, DomainResult, PhaseCurrents, Transaction};
use crate::support::shutdown::ShutdownSignal;

const COMMAND_QUEUE: usize = 1024;

/// Why an out-of-tick push did not take effect.
#[derive(Debug, Error)]
pub enum PushNowError {
    #[error(transparent)]
    Refused(#[from] DomainError),

    #[error(transparent)]
    Failed(#[from] PushError),

    #[error("push task aborted")]
    Aborted,
}

type Reply<T> = oneshot::Sender<T>;

pub enum FleetCommand {
    Connect {
        charge_point_id: String,
        remote_addr: Option<String>,
        reply: Reply<bool>,
    },
    Disconnect {
        charge_point_id: String,
    },
    StatusNotification {
        charge_point_id: String,
        connector_id: u32,
        status: ConnectorStatus,
        info: Option<String>,
        error_code: Option<String>,
    },
    MeterValues {
        charge_point_id: String,
        readings: Vec<MeterReading>,
    },
    ClearTelemetry {
        charge_point_id: String,
    },
    ResetCounters {
        charge_point_id: String,
    },
    StartTransaction {
        charge_point_id: String,
        connector_id: u32,
        id_tag: String,
        meter_start: i32,
        reply: Reply<DomainResult<Transaction>>,
    },
    StopTransaction {
        charge_point_id: String,
        transaction_id: i32,
        meter_stop: i32,
        reason: Option<String>,
        reply: Reply<DomainResult<Option<Transaction>>>,
    },
    OverridePowerTarget {
        charge_point_id: String,
        amps: u32,
        reply: Reply<DomainResult<PhaseCurrents>>,
    },
    ClearPowerOverride {
        charge_point_id: String,
        reply: Reply<DomainResult<()>>,
    },
    SetGroupLockout {
        group_id: String,
        locked: bool,
        reply: Reply<DomainResult<()>>,
    },
    ClearActionPending {
        group_id: String,
        reply: Reply<DomainResult<()>>,
    },
    /// Push outside the tick; the reply arrives once the result is applied
    PushNow {
        charge_point_id: String,
        limits: PhaseCurrents,
        reply: Reply<Result<(), PushNowError>>,
    },
    GetChargePoint {
        charge_point_id: String,
        reply: Reply<Option<ChargePoint>>,
    },
    GetChargePoints {
        reply: Reply<Vec<ChargePoint>>,
    },
    GetSystemState {
        reply: Reply<SystemState>,
    },
    Snapshot {
        reply: Reply<FleetSnapshot>,
    },
}

/// Cloneable front door to the engine.
#[derive(Clone)]
pub struct DlmHandle {
    tx: mpsc::Sender<FleetCommand>,
}

impl DlmHandle {
    async fn send(&self, command: FleetCommand) -> DomainResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| DomainError::EngineUnavailable)
    }

    async fn ask<T>(&self, build: impl FnOnce(Reply<T>) -> FleetCommand) -> DomainResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| DomainError::EngineUnavailable)
    }

    /// Register a session. Returns true for a never-seen station.
    pub async fn connect(&self, charge_point_id: &str, remote_addr: Option<String>) -> DomainResult<bool> {
        let charge_point_id = charge_point_id.to_string();
        self.ask(|reply| FleetCommand::Connect {
            charge_point_id,
            remote_addr,
            reply,
        })
        .await
    }

    pub async fn disconnect(&self, charge_point_id: &str) -> DomainResult<()> {
        self.send(FleetCommand::Disconnect {
            charge_point_id: charge_point_id.to_string(),
        })
        .await
    }

    pub async fn status_notification(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        status: ConnectorStatus,
        info: Option<String>,
        error_code: Option<String>,
    ) -> DomainResult<()> {
        self.send(FleetCommand::StatusNotification {
            charge_point_id: charge_point_id.to_string(),
            connector_id,
            status,
            info,
            error_code,
        })
        .await
    }

    pub async fn meter_values(&self, charge_point_id: &str, readings: Vec<MeterReading>) -> DomainResult<()> {
        self.send(FleetCommand::MeterValues {
            charge_point_id: charge_point_id.to_string(),
            readings,
        })
        .await
    }

    pub async fn clear_telemetry(&self, charge_point_id: &str) -> DomainResult<()> {
        self.send(FleetCommand::ClearTelemetry {
            charge_point_id: charge_point_id.to_string(),
        })
        .await
    }

    pub async fn reset_counters(&self, charge_point_id: &str) -> DomainResult<()> {
        self.send(FleetCommand::ResetCounters {
            charge_point_id: charge_point_id.to_string(),
        })
        .await
    }

    pub async fn start_transaction(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        id_tag: &str,
        meter_start: i32,
    ) -> DomainResult<Transaction> {
        let (charge_point_id, id_tag) = (charge_point_id.to_string(), id_tag.to_string());
        self.ask(|reply| FleetCommand::StartTransaction {
            charge_point_id,
            connector_id,
            id_tag,
            meter_start,
            reply,
        })
        .await?
    }

    pub async fn stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
        meter_stop: i32,
        reason: Option<String>,
    ) -> DomainResult<Option<Transaction>> {
        let charge_point_id = charge_point_id.to_string();
        self.ask(|reply| FleetCommand::StopTransaction {
            charge_point_id,
            transaction_id,
            meter_stop,
            reason,
            reply,
        })
        .await?
    }

    pub async fn override_power_target(&self, charge_point_id: &str, amps: u32) -> DomainResult<PhaseCurrents> {
        let charge_point_id = charge_point_id.to_string();
        self.ask(|reply| FleetCommand::OverridePowerTarget {
            charge_point_id,
            amps,
            reply,
        })
        .await?
    }

    pub async fn clear_power_override(&self, charge_point_id: &str) -> DomainResult<()> {
        let charge_point_id = charge_point_id.to_string();
        self.ask(|reply| FleetCommand::ClearPowerOverride { charge_point_id, reply })
            .await?
    }

    pub async fn set_group_lockout(&self, group_id: &str, locked: bool) -> DomainResult<()> {
        let group_id = group_id.to_string();
        self.ask(|reply| FleetCommand::SetGroupLockout {
            group_id,
            locked,
            reply,
        })
        .await?
    }

    pub async fn clear_action_pending(&self, group_id: &str) -> DomainResult<()> {
        let group_id = group_id.to_string();
        self.ask(|reply| FleetCommand::ClearActionPending { group_id, reply })
            .await?
    }

    pub async fn push_now(&self, charge_point_id: &str, limits: PhaseCurrents) -> Result<(), PushNowError> {
        let charge_point_id = charge_point_id.to_string();
        self.ask(|reply| FleetCommand::PushNow {
            charge_point_id,
            limits,
            reply,
        })
        .await?
    }

    pub async fn charge_point(&self, charge_point_id: &str) -> DomainResult<Option<ChargePoint>> {
        let charge_point_id = charge_point_id.to_string();
        self.ask(|reply| FleetCommand::GetChargePoint { charge_point_id, reply })
            .await
    }

    pub async fn charge_points(&self) -> DomainResult<Vec<ChargePoint>> {
        self.ask(|reply| FleetCommand::GetChargePoints { reply }).await
    }

    pub async fn system_state(&self) -> DomainResult<SystemState> {
        self.ask(|reply| FleetCommand::GetSystemState { reply }).await
    }

    pub async fn snapshot(&self) -> DomainResult<FleetSnapshot> {
        self.ask(|reply| FleetCommand::Snapshot { reply }).await
    }
}

struct PushCompletion {
    charge_point_id: String,
    limits: PhaseCurrents,
    /// `None` if the push panicked.
    result: Option<Result<(), PushError>>,
    reply: Option<Reply<Result<(), PushNowError>>>,
}

pub struct DlmEngine {
    fleet: Fleet,
    commands: mpsc::Receiver<FleetCommand>,
    pusher: SharedConfigurationPusher,
    events: SharedEventBus,
    push_permits: Arc<Semaphore>,
    pushes: JoinSet<PushCompletion>,
    config: DlmConfig,
}

impl DlmEngine {
    pub fn new(
        fleet: Fleet,
        pusher: SharedConfigurationPusher,
        events: SharedEventBus,
        config: DlmConfig,
    ) -> (Self, DlmHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let engine = Self {
            fleet,
            commands,
            pusher,
            events,
            push_permits: Arc::new(Semaphore::new(config.max_concurrent_pushes.max(1))),
            pushes: JoinSet::new(),
            config,
        };
        (engine, DlmHandle { tx })
    }

    /// Run until shutdown. Returns the final snapshot for persistence.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> FleetSnapshot {
        info!(
            "⚡ DLM engine started (tick: {}s, max {} concurrent pushes)",
            self.config.tick_interval_secs, self.config.max_concurrent_pushes
        );

        // First tick one period in, so reconnecting stations report before it.
        let period = self.config.tick_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop = shutdown.notified().wait();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("⚡ DLM engine shutting down");
                    break;
                }
                _ = interval.tick() => self.run_tick(),
                Some(command) = self.commands.recv() => self.handle(command),
                Some(joined) = self.pushes.join_next(), if !self.pushes.is_empty() => {
                    match joined {
                        Ok(completion) => self.complete(completion),
                        Err(e) => error!(error = %e, "Push task failed"),
                    }
                }
            }
        }

        let outstanding = self.pushes.len();
        if outstanding > 0 {
            warn!(outstanding, "Abandoning in-flight pushes");
        }
        self.pushes.shutdown().await;
        self.fleet.snapshot()
    }

    fn run_tick(&mut self) {
        let started = Instant::now();
        let pushes = self.fleet.tick();
        self.publish_events();
        self.record_gauges();

        for request in pushes {
            self.spawn_push(request, None);
        }
        metrics::counter!("dlm_ticks_total").increment(1);
        metrics::histogram!("dlm_tick_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    fn spawn_push(&mut self, request: PushRequest, reply: Option<Reply<Result<(), PushNowError>>>) {
        let pusher = self.pusher.clone();
        let permits = self.push_permits.clone();
        debug!(
            charge_point_id = request.charge_point_id.as_str(),
            group_id = request.group_id.as_str(),
            limits = %request.limits,
            "Dispatching limit"
        );

        self.pushes.spawn(async move {
            // Closed only if the engine is gone, in which case nobody reads the result.
            let _permit = permits.acquire_owned().await.ok();
            let result = AssertUnwindSafe(pusher.push(&request.charge_point_id, request.limits))
                .catch_unwind()
                .await
                .ok();
            PushCompletion {
                charge_point_id: request.charge_point_id,
                limits: request.limits,
                result,
                reply,
            }
        });
    }

    fn complete(&mut self, completion: PushCompletion) {
        match &completion.result {
            Some(result) => self
                .fleet
                .complete_push(&completion.charge_point_id, completion.limits, result),
            None => {
                error!(charge_point_id = completion.charge_point_id.as_str(), "Push task panicked");
                self.fleet.abandon_push(&completion.charge_point_id, completion.limits);
            }
        }
        self.publish_events();

        if let Some(reply) = completion.reply {
            let outcome = match completion.result {
                Some(result) => result.map_err(PushNowError::from),
                None => Err(PushNowError::Aborted),
            };
            let _ = reply.send(outcome);
        }
    }

    fn handle(&mut self, command: FleetCommand) {
        match command {
            FleetCommand::Connect {
                charge_point_id,
                remote_addr,
                reply,
            } => {
                let is_new = self.fleet.connect(&charge_point_id, remote_addr);
                let _ = reply.send(is_new);
            }
            FleetCommand::Disconnect { charge_point_id } => {
                log_dropped(&charge_point_id, "disconnect", self.fleet.disconnect(&charge_point_id));
            }
            FleetCommand::StatusNotification {
                charge_point_id,
                connector_id,
                status,
                info,
                error_code,
            } => {
                let result = self
                    .fleet
                    .update_status(&charge_point_id, connector_id, status, info, error_code);
                log_dropped(&charge_point_id, "StatusNotification", result);
            }
            FleetCommand::MeterValues {
                charge_point_id,
                readings,
            } => {
                let result = self.fleet.record_meter_values(&charge_point_id, &readings);
                log_dropped(&charge_point_id, "MeterValues", result);
            }
            FleetCommand::ClearTelemetry { charge_point_id } => {
                let result = self.fleet.clear_live_telemetry(&charge_point_id);
                log_dropped(&charge_point_id, "telemetry reset", result);
            }
            FleetCommand::ResetCounters { charge_point_id } => {
                let result = self.fleet.reset_counters(&charge_point_id);
                log_dropped(&charge_point_id, "counter reset", result);
            }
            FleetCommand::StartTransaction {
                charge_point_id,
                connector_id,
                id_tag,
                meter_start,
                reply,
            } => {
                let _ = reply.send(self.fleet.start_transaction(
                    &charge_point_id,
                    connector_id,
                    &id_tag,
                    meter_start,
                ));
            }
            FleetCommand::StopTransaction {
                charge_point_id,
                transaction_id,
                meter_stop,
                reason,
                reply,
            } => {
                let _ = reply.send(self.fleet.stop_transaction(
                    &charge_point_id,
                    transaction_id,
                    meter_stop,
                    reason,
                ));
            }
            FleetCommand::OverridePowerTarget {
                charge_point_id,
                amps,
                reply,
            } => {
                let _ = reply.send(self.fleet.override_power_target(&charge_point_id, amps));
            }
            FleetCommand::ClearPowerOverride { charge_point_id, reply } => {
                let _ = reply.send(self.fleet.clear_power_override(&charge_point_id));
            }
            FleetCommand::SetGroupLockout {
                group_id,
                locked,
                reply,
            } => {
                let _ = reply.send(self.fleet.set_group_lockout(&group_id, locked));
            }
            FleetCommand::ClearActionPending { group_id, reply } => {
                let _ = reply.send(self.fleet.clear_action_pending(&group_id));
            }
            FleetCommand::PushNow {
                charge_point_id,
                limits,
                reply,
            } => match self.fleet.begin_push(&charge_point_id, limits) {
                Ok(request) => self.spawn_push(request, Some(reply)),
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            },
            FleetCommand::GetChargePoint { charge_point_id, reply } => {
                let _ = reply.send(self.fleet.charge_point(&charge_point_id).cloned());
            }
            FleetCommand::GetChargePoints { reply } => {
                let _ = reply.send(self.fleet.charge_points_sorted());
            }
            FleetCommand::GetSystemState { reply } => {
                let _ = reply.send(self.fleet.system_state());
            }
            FleetCommand::Snapshot { reply } => {
                let _ = reply.send(self.fleet.snapshot());
            }
        }
        self.publish_events();
    }

    fn publish_events(&mut self) {
        for event in self.fleet.drain_events() {
            self.events.publish(event);
        }
    }

    fn record_gauges(&self) {
        let state = self.fleet.system_state();
        let online = state.charge_points.iter().filter(|cp| cp.online).count();
        metrics::gauge!("dlm_charge_points_online").set(online as f64);
        metrics::gauge!("dlm_charge_points_total").set(state.charge_points.len() as f64);

        for group in &state.groups {
            let id = group.id.clone();
            metrics::gauge!("dlm_action_pending_stuck", "group" => id.clone())
                .set(if group.alarm { 1.0 } else { 0.0 });
            metrics::gauge!("dlm_group_assigned_amps", "group" => id.clone(), "phase" => "L1")
                .set(f64::from(group.assigned.l1));
            metrics::gauge!("dlm_group_assigned_amps", "group" => id.clone(), "phase" => "L2")
                .set(f64::from(group.assigned.l2));
            metrics::gauge!("dlm_group_assigned_amps", "group" => id.clone(), "phase" => "L3")
                .set(f64::from(group.assigned.l3));
            metrics::gauge!("dlm_group_measured_amps", "group" => id.clone(), "phase" => "L1")
                .set(f64::from(group.current.l1));
            metrics::gauge!("dlm_group_measured_amps", "group" => id.clone(), "phase" => "L2")
                .set(f64::from(group.current.l2));
            metrics::gauge!("dlm_group_measured_amps", "group" => id, "phase" => "L3")
                .set(f64::from(group.current.l3));
        }
    }
}

fn log_dropped(charge_point_id: &str, what: &str, result: DomainResult<()>) {
    if let Err(e) = result {
        error!(charge_point_id, error = %e, "Dropped {}", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dlm::pusher::tests::{Outcome, ScriptedStation};
    use crate::application::dlm::pusher::ConfigurationPusher;
    use crate::application::events::create_event_bus;
    use crate::application::ports::GenericStatus;
    use crate::config::{GroupsConfig, PusherConfig};
    use std::time::Duration;

    fn spawn_engine(station: Arc<ScriptedStation>) -> (DlmHandle, ShutdownSignal, tokio::task::JoinHandle<FleetSnapshot>) {
        let config = DlmConfig::default();
        let fleet = Fleet::new(config.clone(), GroupsConfig::default());
        let pusher = ConfigurationPusher::shared(station, PusherConfig::default());
        let (engine, handle) = DlmEngine::new(fleet, pusher, create_event_bus(), config);
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(engine.run(shutdown.clone()));
        (handle, shutdown, task)
    }

    async fn charging(handle: &DlmHandle, id: &str) {
        handle.connect(id, None).await.unwrap();
        handle
            .status_notification(id, 1, ConnectorStatus::Charging, None, None)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn push_now_updates_assignment() {
        let station = ScriptedStation::with(&[]);
        let (handle, shutdown, task) = spawn_engine(station.clone());
        charging(&handle, "A001").await;

        handle.push_now("A001", PhaseCurrents::ZERO).await.unwrap();
        let cp = handle.charge_point("A001").await.unwrap().unwrap();
        assert_eq!(cp.current_assigned, PhaseCurrents::ZERO);
        assert!(cp.push_in_flight.is_none());
        assert_eq!(station.sent_keys().len(), 3);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn push_now_reports_rejection() {
        let station = ScriptedStation::with(&[(
            "DlmOperatorPhase2Limit",
            Outcome::Status(GenericStatus::Rejected),
        )]);
        let (handle, shutdown, task) = spawn_engine(station);
        charging(&handle, "A001").await;

        let err = handle
            .push_now("A001", PhaseCurrents::uniform(6))
            .await
            .unwrap_err();
        assert!(matches!(err, PushNowError::Failed(PushError::Rejected { .. })));
        let cp = handle.charge_point("A001").await.unwrap().unwrap();
        assert_eq!(cp.current_assigned, PhaseCurrents::ZERO);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn push_now_for_unknown_station_is_refused() {
        let (handle, shutdown, task) = spawn_engine(ScriptedStation::with(&[]));
        let err = handle.push_now("Z9", PhaseCurrents::ZERO).await.unwrap_err();
        assert!(matches!(err, PushNowError::Refused(DomainError::NotFound { .. })));
        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_allocate_and_confirm() {
        let station = ScriptedStation::with(&[]);
        let (handle, shutdown, task) = spawn_engine(station);
        charging(&handle, "A001").await;
        charging(&handle, "A002").await;

        // Standby pushes go out on the first tick; the second aggregates them.
        tokio::time::sleep(Duration::from_secs(21)).await;
        let state = handle.system_state().await.unwrap();
        assert!(state
            .charge_points
            .iter()
            .all(|cp| cp.current_assigned == PhaseCurrents::uniform(6)));
        assert_eq!(state.groups[0].assigned, PhaseCurrents::uniform(12));

        shutdown.trigger();
        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.charge_points.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn override_is_applied_on_next_tick() {
        let station = ScriptedStation::with(&[]);
        let (handle, shutdown, task) = spawn_engine(station);
        charging(&handle, "A001").await;

        let applied = handle.override_power_target("A001", 12).await.unwrap();
        assert_eq!(applied, PhaseCurrents::uniform(12));
        tokio::time::sleep(Duration::from_secs(11)).await;

        let state = handle.system_state().await.unwrap();
        assert_eq!(state.charge_points[0].current_assigned, PhaseCurrents::uniform(12));
        assert!(!state.groups[0].action_pending);

        shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handle_fails_once_engine_stopped() {
        let (handle, shutdown, task) = spawn_engine(ScriptedStation::with(&[]));
        shutdown.trigger();
        task.await.unwrap();
        assert!(matches!(
            handle.charge_points().await,
            Err(DomainError::EngineUnavailable)
        ));
    }
}
