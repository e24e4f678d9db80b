//! Transaction aggregate

pub mod model;

pub use model::{Transaction, TransactionStatus};
