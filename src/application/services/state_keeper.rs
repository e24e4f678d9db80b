//! Saving fleet and identity state
//!
//! Used by the `savePersistence` operator call, the autosave loop and the
//! final save at shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::application::dlm::{DlmHandle, FleetSnapshot};
use crate::application::identity::SharedIdentityService;
use crate::application::ports::SharedStateStore;
use crate::domain::DomainError;
use crate::support::errors::PersistenceError;
use crate::support::shutdown::ShutdownSignal;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Engine(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] PersistenceError),
}

#[derive(Clone)]
pub struct StateKeeper {
    store: SharedStateStore,
    dlm: DlmHandle,
    identity: SharedIdentityService,
}

pub type SharedStateKeeper = Arc<StateKeeper>;

impl StateKeeper {
    pub fn new(store: SharedStateStore, dlm: DlmHandle, identity: SharedIdentityService) -> Self {
        Self { store, dlm, identity }
    }

    /// Snapshot the running engine and write both files.
    pub async fn save_now(&self) -> Result<(), SaveError> {
        let snapshot = self.dlm.snapshot().await?;
        self.save(&snapshot).await
    }

    /// Write a snapshot taken elsewhere, e.g. the one the engine returns on exit.
    pub async fn save(&self, snapshot: &FleetSnapshot) -> Result<(), SaveError> {
        self.store.save_fleet(snapshot).await?;
        self.store.save_identities(&self.identity.snapshot().await).await?;
        metrics::counter!("dlm_state_saves_total").increment(1);
        info!(
            charge_points = snapshot.charge_points.len(),
            groups = snapshot.groups.len(),
            "State saved"
        );
        Ok(())
    }

    /// Periodic saves until shutdown. `None` when disabled.
    pub fn start_autosave(&self, every: Duration, shutdown: ShutdownSignal) -> Option<JoinHandle<()>> {
        if every.is_zero() {
            info!("Autosave disabled");
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move {
            info!("💾 Autosave started (every {}s)", every.as_secs());
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let stop = shutdown.notified().wait();
            tokio::pin!(stop);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.save_now().await {
                            error!(error = %e, "Autosave failed");
                        }
                    }
                    _ = &mut stop => break,
                }
            }
            info!("Autosave stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dlm::pusher::tests::ScriptedStation;
    use crate::application::dlm::{ConfigurationPusher, DlmEngine, Fleet};
    use crate::application::events::create_event_bus;
    use crate::application::identity::IdentityService;
    use crate::application::ports::StateStore;
    use crate::config::{DlmConfig, GroupsConfig, PusherConfig};
    use crate::domain::{Identity, IdentityBook};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        fleet: Mutex<Option<FleetSnapshot>>,
        identities: Mutex<Option<IdentityBook>>,
    }

    #[async_trait]
    impl StateStore for MemoryStore {
        async fn load_fleet(&self) -> Result<Option<FleetSnapshot>, PersistenceError> {
            Ok(self.fleet.lock().unwrap().clone())
        }
        async fn save_fleet(&self, snapshot: &FleetSnapshot) -> Result<(), PersistenceError> {
            *self.fleet.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
        async fn load_identities(&self) -> Result<Option<IdentityBook>, PersistenceError> {
            Ok(self.identities.lock().unwrap().clone())
        }
        async fn save_identities(&self, book: &IdentityBook) -> Result<(), PersistenceError> {
            *self.identities.lock().unwrap() = Some(book.clone());
            Ok(())
        }
    }

    fn keeper() -> (StateKeeper, Arc<MemoryStore>, DlmHandle, ShutdownSignal) {
        let config = DlmConfig::default();
        let pusher = ConfigurationPusher::shared(ScriptedStation::with(&[]), PusherConfig::default());
        let (engine, dlm) = DlmEngine::new(
            Fleet::new(config.clone(), GroupsConfig::default()),
            pusher,
            create_event_bus(),
            config,
        );
        let shutdown = ShutdownSignal::new();
        tokio::spawn(engine.run(shutdown.clone()));

        let mut book = IdentityBook::default();
        book.cards.insert("04AB12".into(), Identity::authorized());
        let store = Arc::new(MemoryStore::default());
        let keeper = StateKeeper::new(store.clone(), dlm.clone(), IdentityService::shared(book));
        (keeper, store, dlm, shutdown)
    }

    #[tokio::test]
    async fn save_now_writes_fleet_and_identities() {
        let (keeper, store, dlm, shutdown) = keeper();
        dlm.connect("A001", None).await.unwrap();

        keeper.save_now().await.unwrap();

        let fleet = store.load_fleet().await.unwrap().unwrap();
        assert!(fleet.charge_points.contains_key("A001"));
        let book = store.load_identities().await.unwrap().unwrap();
        assert!(book.cards.contains_key("04AB12"));
        shutdown.trigger();
    }

    #[tokio::test]
    async fn save_now_fails_once_engine_is_gone() {
        let (keeper, _store, _dlm, shutdown) = keeper();
        shutdown.trigger();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(keeper.save_now().await, Err(SaveError::Engine(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_runs_on_its_period() {
        let (keeper, store, dlm, shutdown) = keeper();
        dlm.connect("B001", None).await.unwrap();

        assert!(keeper.start_autosave(Duration::ZERO, shutdown.clone()).is_none());
        let task = keeper
            .start_autosave(Duration::from_secs(300), shutdown.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(store.load_fleet().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.load_fleet().await.unwrap().is_some());

        shutdown.trigger();
        task.await.unwrap();
    }
}
