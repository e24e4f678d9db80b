//! Inbound interfaces
//!
//! - `ws`: OCPP 1.6-J listener and the `/events` stream
//! - `http`: operator JSON-RPC API

pub mod http;
pub mod ws;
