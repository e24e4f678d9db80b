//! WebSocket interfaces
//!
//! - `ocpp_server`: OCPP 1.6-J listener for charge points
//! - `notifications`: `/events` stream for operator dashboards

pub mod notifications;
pub mod ocpp_server;

pub use notifications::{ws_events_handler, EventFilter};
pub use ocpp_server::{OcppServer, OcppServerContext};
