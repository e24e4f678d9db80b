//! Identity module: id tag authorization and energy booking
//!
//! Wraps the `IdentityBook` loaded from the identity file. OCPP handlers
//! ask it for an authorization status and book finished transactions
//! onto it; the persistence layer reads it back for saving.

pub mod service;

pub use service::{IdentityService, SharedIdentityService};
