//! pv-mirror: Pivot mirror daemon
//!
//! A mirror joins two endpoints. Paired with a second mirror on the other
//! side of a network boundary, it relays every connection arriving at one
//! side to a target reachable only from the other, over an encrypted
//! command link and per-connection dial-back sockets.

pub mod backoff;
pub mod command;
pub mod endpoint;
pub mod mirror;
pub mod net;
pub mod peer;
pub mod pivot;
pub mod registry;

pub use mirror::{Mirror, MirrorHandle};
pub use registry::MirrorRegistry;
