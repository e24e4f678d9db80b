pub mod commands;
pub mod dlm;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod ports;
pub mod services;
pub mod session;

// Re-export key types for convenience
pub use commands::{
    create_command_sender, CommandDispatcher, CommandError, CommandSender, SharedCommandSender,
};
pub use dlm::{DlmEngine, DlmHandle, Fleet, FleetSnapshot};
pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use handlers::OcppHandlerV16;
pub use identity::{IdentityService, SharedIdentityService};
pub use ports::{
    ChargePointCommands, GenericStatus, SharedChargePointCommands, SharedStateStore, StateStore,
    TriggerType,
};
pub use services::{Provisioner, StateKeeper};
pub use session::{SessionRegistry, SharedSessionRegistry};
