//! Job and configuration-database implementations for the local host.

pub use trex_local::*;
