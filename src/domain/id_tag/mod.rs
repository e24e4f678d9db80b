//! IdTag aggregate
//!
//! Identity records and the authorization decision derived from them.

pub mod model;

pub use model::{classify_id_tag, IdTagStatus, Identity, IdentityBook, IdentityKind, MAC_PREFIX};
