//! Authorization service, application-layer orchestration
//!
//! Lookups never touch charger state. Resetting a charger's DLM counters on
//! Authorize is a message to the engine, sent by the caller.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{IdTagStatus, IdentityBook, Transaction};

pub struct IdentityService {
    book: RwLock<IdentityBook>,
}

pub type SharedIdentityService = Arc<IdentityService>;

impl IdentityService {
    pub fn new(book: IdentityBook) -> Self {
        info!(identities = book.len(), "Identity book loaded");
        Self {
            book: RwLock::new(book),
        }
    }

    pub fn shared(book: IdentityBook) -> SharedIdentityService {
        Arc::new(Self::new(book))
    }

    pub async fn authorize(&self, id_tag: &str) -> IdTagStatus {
        let status = self.book.read().await.authorize(id_tag);
        match status {
            IdTagStatus::Accepted => debug!(id_tag, "Id tag accepted"),
            other => warn!(id_tag, status = %other, "Id tag refused"),
        }
        status
    }

    /// Add a finished transaction's energy to its identity. Unknown tags
    /// (remote starts, since-deleted cards) are skipped.
    pub async fn book_transaction(&self, transaction: &Transaction) -> bool {
        let energy = transaction.energy_consumed().unwrap_or(0);
        let mut book = self.book.write().await;
        let Some(identity) = book.get_mut(&transaction.id_tag) else {
            debug!(
                id_tag = transaction.id_tag.as_str(),
                transaction_id = transaction.id,
                "No identity to book energy onto"
            );
            return false;
        };
        if !identity.tx_list.insert(transaction.id) {
            warn!(transaction_id = transaction.id, "Transaction already booked");
            return false;
        }
        identity.energy_charged += energy;
        info!(
            id_tag = transaction.id_tag.as_str(),
            transaction_id = transaction.id,
            energy_wh = energy,
            total_wh = identity.energy_charged,
            "Energy booked"
        );
        true
    }

    pub async fn snapshot(&self) -> IdentityBook {
        self.book.read().await.clone()
    }
}
