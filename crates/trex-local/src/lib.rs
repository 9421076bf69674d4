#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

//! Capabilities of the local host: a [job factory](LocalFactory) running the generator as a
//! child process, and a [configuration database](SysfsDb) over sysfs.

mod process;
mod sysfs;

pub use process::{LocalFactory, LocalJob};
pub use sysfs::SysfsDb;
