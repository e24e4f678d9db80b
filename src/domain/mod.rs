pub mod charge_point;
pub mod events;
pub mod group;
pub mod id_tag;
pub mod phase;
pub mod transaction;

// Re-export commonly used types
pub use charge_point::{ChargePoint, ChargingMode, ConnectorStatus, DlmCounters};
pub use group::{group_id_for, Group};
pub use id_tag::{IdTagStatus, Identity, IdentityBook, IdentityKind};
pub use phase::{Phase, PhaseCurrents, PhasePower};
pub use transaction::{Transaction, TransactionStatus};

pub use crate::support::errors::DomainError;

pub type DomainResult<T> = Result<T, DomainError>;
