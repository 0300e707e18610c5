//! IPC types published to the UI layer.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON.

pub mod events;
