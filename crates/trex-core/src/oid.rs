//! Configuration-database object identifiers naming network interfaces.
//!
//! An OID is a slash-separated list of `name:instance` sub-identifiers. Three shapes identify
//! a NIC:
//!
//! - `/agent:<agent>/interface:<ifname>`
//! - `/agent:<agent>/hardware:/pci:/device:<bdf>`
//! - `/agent:<agent>/hardware:/pci:/vendor:<vendor>/device:<device>/instance:<n>`

use std::fmt;
use std::str::FromStr;

use crate::addr::PciAddr;

/// A parsed interface OID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Oid {
    /// A kernel network interface.
    Interface {
        /// Test agent name.
        agent: String,
        /// Interface name, e.g. `eth0`.
        name: String,
    },
    /// A PCI function by address.
    Device {
        /// Test agent name.
        agent: String,
        /// Bus/device/function address.
        addr: PciAddr,
    },
    /// The `instance`-th PCI function with the given vendor and device IDs.
    Vendor {
        /// Test agent name.
        agent: String,
        /// PCI vendor ID (hex).
        vendor: String,
        /// PCI device ID (hex).
        device: String,
        /// Zero-based instance among functions with these IDs.
        instance: u32,
    },
}

impl Oid {
    /// Returns the agent the OID refers to.
    pub fn agent(&self) -> &str {
        match self {
            Oid::Interface { agent, .. } | Oid::Device { agent, .. } | Oid::Vendor { agent, .. } => {
                agent
            }
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oid::Interface { agent, name } => write!(f, "/agent:{agent}/interface:{name}"),
            Oid::Device { agent, addr } => {
                write!(f, "/agent:{agent}/hardware:/pci:/device:{addr}")
            }
            Oid::Vendor {
                agent,
                vendor,
                device,
                instance,
            } => write!(
                f,
                "/agent:{agent}/hardware:/pci:/vendor:{vendor}/device:{device}/instance:{instance}"
            ),
        }
    }
}

impl FromStr for Oid {
    type Err = OidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let subids = s
            .strip_prefix('/')
            .ok_or_else(|| OidError::Malformed(s.to_owned()))?
            .split('/')
            .map(|subid| subid.split_once(':').unwrap_or((subid, "")))
            .collect::<Vec<_>>();
        let oid = match subids.as_slice() {
            [("agent", agent), ("interface", name)] if !name.is_empty() => Oid::Interface {
                agent: agent.to_string(),
                name: name.to_string(),
            },
            [("agent", agent), ("hardware", ""), ("pci", ""), ("device", addr)] => Oid::Device {
                agent: agent.to_string(),
                addr: addr.parse().map_err(|_| OidError::Malformed(s.to_owned()))?,
            },
            [("agent", agent), ("hardware", ""), ("pci", ""), ("vendor", vendor), ("device", device), ("instance", instance)] => {
                Oid::Vendor {
                    agent: agent.to_string(),
                    vendor: vendor.to_string(),
                    device: device.to_string(),
                    instance: instance
                        .parse()
                        .map_err(|_| OidError::Malformed(s.to_owned()))?,
                }
            }
            _ => return Err(OidError::UnknownShape(s.to_owned())),
        };
        if oid.agent().is_empty() {
            return Err(OidError::Malformed(s.to_owned()));
        }
        Ok(oid)
    }
}

/// Error parsing an OID.
#[derive(Debug, thiserror::Error)]
pub enum OidError {
    /// The OID is not a well-formed sub-identifier list.
    #[error("malformed OID {0:?}")]
    Malformed(String),

    /// The OID does not name an interface or PCI function.
    #[error("OID {0:?} does not identify a network interface")]
    UnknownShape(String),

    /// A kernel interface was requested for an OID that is not an interface OID.
    #[error("OID {0} does not name a kernel interface")]
    NotAnInterface(Oid),
}
