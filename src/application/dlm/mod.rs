//! Dynamic load management
//!
//! `evaluate` runs the per-charger state machine, `allocate` splits a group's
//! leftover budget, `pusher` commits limits to stations and `fleet` ties them
//! together in one tick. `engine` is the task that owns the fleet.

pub mod allocate;
pub mod engine;
pub mod evaluate;
pub mod fleet;
pub mod pusher;

pub use allocate::{allocate, fair_share, Allocation, Totals};
pub use engine::{DlmEngine, DlmHandle, FleetCommand, PushNowError};
pub use evaluate::{evaluate, Evaluation};
pub use fleet::{AlarmInfo, Fleet, FleetSnapshot, MeterReading, PushRequest, SystemState};
pub use pusher::{ConfigurationPusher, PushError, SharedConfigurationPusher};
