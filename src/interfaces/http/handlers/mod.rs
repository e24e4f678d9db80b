//! HTTP handlers

pub mod health;
pub mod prometheus;
pub mod rpc;

pub use health::{health_check, HealthState};
pub use prometheus::{http_metrics_middleware, prometheus_metrics};
pub use rpc::{rpc_handler, server_header, ApiState, RpcReply, RpcRequest};
