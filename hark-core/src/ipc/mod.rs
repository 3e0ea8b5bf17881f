//! Event types published by the wake-word service.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON lines, over a socket, or to a status endpoint.

pub mod events;
