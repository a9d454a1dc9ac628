//! pv-core: Core configuration and abstractions for pivot mirrors
//!
//! Shared by the mirror daemon: configuration structures, the error
//! taxonomy, endpoint classification and the leg abstraction the copy loop
//! is written against.

pub mod config;
pub mod error;
pub mod leg;
pub mod traits;
pub mod types;

pub use error::{ConfigError, PivotError};
pub use leg::{Leg, LegPair};
pub use traits::{LegReader, LegWriter};
pub use types::{Endpoint, EndpointId, EndpointRole, MirrorState, Protocol, SecuredLeg};
