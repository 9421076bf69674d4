//! A driver for the TRex traffic generator. Given [generator options](core::TrexOpts) it
//! configures the ports of a test agent, runs the generator in advanced stateful mode and
//! turns its console output into a [report](core::Report) of throughput, connection rate and
//! per-port counters.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
pub mod local;
pub mod utils;
