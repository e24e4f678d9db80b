//! Group aggregate: capacity budget and per-tick aggregates.

pub mod model;

pub use model::Group;

/// Group id derived from the leading characters of a station id.
pub fn group_id_for(charge_point_id: &str, prefix_len: usize) -> String {
    charge_point_id.chars().take(prefix_len.max(1)).collect()
}
