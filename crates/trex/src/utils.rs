//! Reading run specifications from files.

pub use trex_utils::*;
