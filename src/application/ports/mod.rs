//! Application ports

pub mod outbound;
pub mod state_store;

pub use outbound::{ChargePointCommands, GenericStatus, SharedChargePointCommands, TriggerType};
pub use state_store::{SharedStateStore, StateStore};
