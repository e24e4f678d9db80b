//! State persistence
//!
//! The fleet snapshot and the identity book are kept as pretty JSON files.
//! A missing file is a cold start, not an error.

mod json_file;

pub use json_file::JsonFileStore;
