//! OCPP 1.6 command serialisers built on `rust_ocpp` types.

pub mod configuration;
pub mod remote_transaction;
pub mod trigger_message;
pub mod unlock_connector;

pub use configuration::change_configuration;
pub use remote_transaction::{remote_start_transaction, remote_stop_transaction};
pub use trigger_message::trigger_message;
pub use unlock_connector::unlock_connector;
