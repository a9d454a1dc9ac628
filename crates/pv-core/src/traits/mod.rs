//! Core trait definitions

mod leg;

pub use leg::{LegReader, LegWriter};
