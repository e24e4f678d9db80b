//! # OCPP DLM
//!
//! OCPP 1.6 central system with dynamic load management: charge points
//! sharing a group supply get their per-phase current limits recomputed
//! every tick and pushed as configuration keys.
//!
//! ## Architecture
//!
//! - **domain**: phase currents, charge points, groups, transactions, identities
//! - **application**: DLM engine, OCPP handlers, commands, provisioning, events
//! - **infrastructure**: JSON snapshot persistence
//! - **interfaces**: OCPP WebSocket server, operator JSON-RPC API, `/events`
//! - **support**: errors, OCPP-J framing, graceful shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod support;

pub use config::{default_config_path, AppConfig};
pub use server::ServerHandle;
