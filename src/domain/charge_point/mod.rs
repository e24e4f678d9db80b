//! Charge Point aggregate
//!
//! Physical telemetry, assigned/targeted limits and load-management state of
//! one single-connector station.

pub mod model;

pub use model::{ChargePoint, ChargingMode, ConnectorStatus, DlmCounters, ENERGY_FLOWING_INFO};
