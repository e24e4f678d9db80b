//! Server runtime
//!
//! [`ServerHandle`] assembles the central system: saved state, the DLM
//! engine, the OCPP WebSocket listener, the operator API and autosave.
//! Shutdown stops the listeners, takes the engine's final snapshot and
//! writes it to disk.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::commands::{create_command_sender, CommandDispatcher, DEFAULT_RESPONSE_TIMEOUT};
use crate::application::dlm::{ConfigurationPusher, DlmEngine, DlmHandle, Fleet, FleetSnapshot};
use crate::application::events::{create_event_bus, SharedEventBus};
use crate::application::identity::IdentityService;
use crate::application::ports::{SharedChargePointCommands, SharedStateStore, StateStore};
use crate::application::services::{Provisioner, StateKeeper};
use crate::application::session::{SessionRegistry, SharedSessionRegistry};
use crate::config::AppConfig;
use crate::infrastructure::JsonFileStore;
use crate::interfaces::http::handlers::{ApiState, HealthState};
use crate::interfaces::http::{create_api_router, RouterState};
use crate::interfaces::ws::{OcppServer, OcppServerContext};
use crate::support::shutdown::{ShutdownCoordinator, ShutdownSignal};

/// The global recorder can only be installed once per process.
fn prometheus_handle() -> Option<PrometheusHandle> {
    static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("📊 Prometheus metrics recorder installed");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "Prometheus recorder unavailable, /metrics disabled");
                None
            }
        })
        .clone()
}

/// Handle to a running central system.
pub struct ServerHandle {
    pub event_bus: SharedEventBus,
    pub session_registry: SharedSessionRegistry,
    pub dlm: DlmHandle,
    pub config: AppConfig,

    keeper: StateKeeper,
    shutdown: ShutdownCoordinator,
    engine_task: JoinHandle<FleetSnapshot>,
    ws_task: JoinHandle<()>,
    api_task: JoinHandle<()>,
    autosave_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub async fn start(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Starting OCPP DLM central system v{}...", env!("CARGO_PKG_VERSION"));

        let prometheus = prometheus_handle();

        // ── Saved state ────────────────────────────────────────
        let store: SharedStateStore = Arc::new(JsonFileStore::from_config(&config.persistence));
        let fleet = match store.load_fleet().await? {
            Some(snapshot) => {
                info!(
                    charge_points = snapshot.charge_points.len(),
                    groups = snapshot.groups.len(),
                    "Fleet state restored"
                );
                Fleet::from_snapshot(snapshot, config.dlm.clone(), config.groups.clone())
            }
            None => Fleet::new(config.dlm.clone(), config.groups.clone()),
        };
        let identity = IdentityService::shared(store.load_identities().await?.unwrap_or_default());

        // ── Event bus, sessions, outbound commands ─────────────
        let event_bus = create_event_bus();
        let session_registry = SessionRegistry::shared();
        let command_sender = create_command_sender(session_registry.clone(), DEFAULT_RESPONSE_TIMEOUT);
        let commands: SharedChargePointCommands = CommandDispatcher::shared(command_sender.clone());

        // ── DLM engine ─────────────────────────────────────────
        let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
        let signal = shutdown.signal();

        let pusher = ConfigurationPusher::shared(commands.clone(), config.pusher.clone());
        let (engine, dlm) = DlmEngine::new(fleet, pusher, event_bus.clone(), config.dlm.clone());
        let engine_task = tokio::spawn(engine.run(signal.clone()));

        let provisioner = Provisioner::new(commands.clone(), dlm.clone(), config.provisioning.clone());
        let keeper = StateKeeper::new(store, dlm.clone(), identity.clone());
        let autosave_task = keeper.start_autosave(
            Duration::from_secs(config.persistence.autosave_secs),
            signal.clone(),
        );

        // ── OCPP WebSocket server ──────────────────────────────
        let ws_server = OcppServer::new(
            config.server.ws_address(),
            OcppServerContext {
                session_registry: session_registry.clone(),
                command_sender,
                dlm: dlm.clone(),
                identity: identity.clone(),
                provisioner,
                heartbeat_interval: config.server.heartbeat_interval,
            },
            signal.clone(),
        );
        let ws_task = tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                error!("WebSocket server error: {}", e);
            }
        });

        // ── Operator API ───────────────────────────────────────
        let mut router_state = RouterState::new(
            ApiState {
                dlm: dlm.clone(),
                commands,
                identity,
                keeper: keeper.clone(),
            },
            HealthState {
                started_at: Instant::now(),
                sessions: session_registry.clone(),
            },
            event_bus.clone(),
        );
        if let Some(handle) = prometheus {
            router_state = router_state.with_metrics(handle);
        }

        let api_addr = config.server.api_address();
        let listener = tokio::net::TcpListener::bind(&api_addr).await?;
        info!("Operator API listening on http://{}/api", api_addr);

        let api_shutdown = signal.clone();
        let api_server = axum::serve(listener, create_api_router(router_state)).with_graceful_shutdown(
            async move {
                api_shutdown.notified().wait().await;
                info!("🛑 Operator API received shutdown signal");
            },
        );
        let api_task = tokio::spawn(async move {
            if let Err(e) = api_server.await {
                error!("Operator API error: {}", e);
            }
        });

        info!("🚀 All servers started.");

        Ok(Self {
            event_bus,
            session_registry,
            dlm,
            config,
            keeper,
            shutdown,
            engine_task,
            ws_task,
            api_task,
            autosave_task,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Install SIGTERM / SIGINT listeners that trigger shutdown.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    /// Block until shutdown is triggered, then stop every task and save state.
    pub async fn run_until_shutdown(self) {
        let Self {
            keeper,
            shutdown,
            engine_task,
            ws_task,
            api_task,
            autosave_task,
            ..
        } = self;

        let finished = shutdown
            .shutdown_with_cleanup(|| async move {
                for (name, task) in [("WebSocket server", ws_task), ("Operator API", api_task)] {
                    if let Err(e) = task.await {
                        error!("{} task panicked: {}", name, e);
                    }
                }
                if let Some(task) = autosave_task {
                    let _ = task.await;
                }

                match engine_task.await {
                    Ok(snapshot) => match keeper.save(&snapshot).await {
                        Ok(()) => info!("✅ Final state saved"),
                        Err(e) => error!(error = %e, "Final state save failed"),
                    },
                    Err(e) => error!("DLM engine task panicked, state not saved: {}", e),
                }
            })
            .await;

        if !finished {
            warn!("Some tasks did not stop in time");
        }
        info!("👋 OCPP DLM central system stopped");
    }
}
