//! Export of resolved scenes.
//!
//! Turning instances into host objects is left to the consumer; these are
//! the two flat forms the crate produces itself.

pub mod json;
pub mod raw;

pub use json::export_json;
pub use raw::{export_raw, RawSceneData};
