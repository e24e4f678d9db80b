//! Storage port for fleet and identity snapshots

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::dlm::FleetSnapshot;
use crate::domain::IdentityBook;
use crate::support::errors::PersistenceError;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when nothing was saved yet.
    async fn load_fleet(&self) -> Result<Option<FleetSnapshot>, PersistenceError>;
    async fn save_fleet(&self, snapshot: &FleetSnapshot) -> Result<(), PersistenceError>;

    async fn load_identities(&self) -> Result<Option<IdentityBook>, PersistenceError>;
    async fn save_identities(&self, book: &IdentityBook) -> Result<(), PersistenceError>;
}

pub type SharedStateStore = Arc<dyn StateStore>;
