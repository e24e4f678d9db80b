//! Infrastructure layer - external concerns

pub mod persistence;

pub use persistence::JsonFileStore;
