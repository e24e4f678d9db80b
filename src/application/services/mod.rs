//! Application services

mod provisioning;
mod state_keeper;

pub use provisioning::{Provisioner, SharedProvisioner};
pub use state_keeper::{SaveError, SharedStateKeeper, StateKeeper};
