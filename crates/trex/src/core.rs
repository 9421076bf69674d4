//! Core data structures and the generator lifecycle. The most common entry point is
//! [TrexApp::create()], which prepares a generator from [options](TrexOpts).

pub use trex_core::*;
