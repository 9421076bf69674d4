#![warn(unreachable_pub, missing_debug_implementations)]

//! The core of the TRex driver. This crate turns [generator options](TrexOpts) into a
//! [running generator](TrexApp) on a test agent and its console output into a
//! [report](Report).
//!
//! The agent is reached through two capabilities: a [`JobFactory`], which runs processes and
//! manages files, and a [`ConfigDb`], which resolves and binds PCI functions.

#[macro_use]
mod ident;

mod addr;
mod app;
mod args;
mod assembler;
mod config;
mod db;
mod error;
mod expand;
mod filters;
mod iface;
mod job;
mod kvpairs;
mod meas;
mod oid;
mod opts;
mod report;
mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use addr::{AddrError, MacAddr, PciAddr, PortAddr};
pub use app::{AppState, TrexApp, TIMEOUT};
pub use config::{DEFAULT_CFG_TEMPLATE, DUMMY_IFACE};
pub use db::{ConfigDb, DbError};
pub use error::{Error, ErrorKind};
pub use expand::{expand, ExpandError};
pub use filters::{STDERR_TEE, STDOUT_TEE};
pub use iface::Interface;
pub use job::{
    FilterDesc, FilterId, Job, JobDesc, JobError, JobFactory, JobStatus, LineFilter, Message,
    Stream, SIGKILL, SIGTERM,
};
pub use kvpairs::KvPairs;
pub use meas::{Aggregation, MeasKind, Measurement, MeasurementSink, MiLog};
pub use oid::{Oid, OidError};
pub use opts::{
    EndpointConfig, Iom, SharedObject, TrexOpts, Verbose, DEFAULT_CLIENT_PAYLOAD,
    DEFAULT_PORT, DEFAULT_SERVER_PAYLOAD,
};
pub use report::{PerPortStat, PortParam, PortStat, Report, ReportError};
pub use units::{parse_count, parse_prefixed, parse_secs, UnitError};
