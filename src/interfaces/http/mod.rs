//! Operator HTTP interface
//!
//! - `handlers`: JSON-RPC, health and Prometheus endpoints
//! - `router`: axum router with CORS, tracing and request metrics

pub mod handlers;
pub mod router;

pub use router::{create_api_router, RouterState};
