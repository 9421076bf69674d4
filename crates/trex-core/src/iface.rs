//! Interface descriptors and PCI driver binding.

use std::fmt;

use crate::addr::PciAddr;
use crate::db::{ConfigDb, DbError};
use crate::oid::{Oid, OidError};
use crate::Error;

/// A NIC handed to the generator.
///
/// Kernel interfaces are used as they are. PCI functions must be bound to a userspace driver
/// before the generator starts, so only they ever need binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Interface {
    /// A kernel network interface, e.g. `eth0`.
    Kernel(String),
    /// A PCI function.
    Pci(PciAddr),
}

impl Interface {
    /// Builds a descriptor from an OID.
    ///
    /// With `use_kernel` set, the OID must name a kernel interface and is used as is.
    /// Otherwise any interface OID is resolved to its PCI function through `db`.
    pub fn from_oid(db: &dyn ConfigDb, oid: &str, use_kernel: bool) -> Result<Self, Error> {
        let oid = oid.parse::<Oid>()?;
        if use_kernel {
            return match oid {
                Oid::Interface { name, .. } => Ok(Interface::Kernel(name)),
                oid => Err(OidError::NotAnInterface(oid).into()),
            };
        }
        let addr = match &oid {
            Oid::Interface { agent, name } => db.interface_pci_addr(agent, name)?,
            Oid::Device { agent, addr } => db.device_pci_addr(agent, *addr)?,
            Oid::Vendor {
                agent,
                vendor,
                device,
                instance,
            } => db.instance_pci_addr(agent, vendor, device, *instance)?,
        };
        log::debug!("{oid} resolved to PCI function {addr}");
        Ok(Interface::Pci(addr))
    }

    /// A kernel interface on `agent`.
    pub fn linux(db: &dyn ConfigDb, agent: &str, ifname: &str) -> Result<Self, Error> {
        Self::from_oid(db, &format!("/agent:{agent}/interface:{ifname}"), true)
    }

    /// The PCI function behind the kernel interface `ifname` on `agent`.
    pub fn pci_by_iface(db: &dyn ConfigDb, agent: &str, ifname: &str) -> Result<Self, Error> {
        Self::from_oid(db, &format!("/agent:{agent}/interface:{ifname}"), false)
    }

    /// The PCI function at `bdf` on `agent`.
    pub fn pci_by_bdf(db: &dyn ConfigDb, agent: &str, bdf: &str) -> Result<Self, Error> {
        Self::from_oid(db, &format!("/agent:{agent}/hardware:/pci:/device:{bdf}"), false)
    }

    /// Returns `true` if the interface must be bound to a userspace driver.
    pub fn needs_bind(&self) -> bool {
        matches!(self, Interface::Pci(_))
    }

    /// Returns the PCI address of a PCI interface.
    pub fn pci_addr(&self) -> Option<PciAddr> {
        match self {
            Interface::Pci(addr) => Some(*addr),
            Interface::Kernel(_) => None,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Kernel(name) => f.write_str(name),
            Interface::Pci(addr) => addr.fmt(f),
        }
    }
}

/// A PCI function bound to a userspace driver, with enough state to undo the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) addr: PciAddr,
    driver: String,
    previous: Option<String>,
}

/// Binds `addr` on `agent` to `driver`. Binding a function that already uses `driver` is a
/// no-op.
pub(crate) fn bind(
    db: &dyn ConfigDb,
    agent: &str,
    addr: PciAddr,
    driver: &str,
) -> Result<Binding, DbError> {
    let previous = db.pci_driver(agent, addr)?;
    if previous.as_deref() == Some(driver) {
        log::debug!("{agent}: {addr} is already bound to {driver}");
    } else {
        db.bind_driver(agent, addr, driver)?;
        log::info!("{agent}: bound {addr} to {driver}");
    }
    Ok(Binding {
        addr,
        driver: driver.to_owned(),
        previous,
    })
}

/// Returns `binding.addr` to the driver it used before [`bind`].
pub(crate) fn release(db: &dyn ConfigDb, agent: &str, binding: &Binding) -> Result<(), DbError> {
    let Binding {
        addr,
        driver,
        previous,
    } = binding;
    match previous {
        Some(prev) if prev == driver => Ok(()),
        Some(prev) => {
            log::info!("{agent}: rebinding {addr} to {prev}");
            db.bind_driver(agent, *addr, prev)
        }
        None => {
            log::info!("{agent}: unbinding {addr} from {driver}");
            db.unbind_driver(agent, *addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDb;

    #[test]
    fn kernel_descriptor_needs_no_bind() -> anyhow::Result<()> {
        let db = MockDb::default();
        let iface = Interface::from_oid(&db, "/agent:Agt_A/interface:eth0", true)?;
        assert_eq!(iface, Interface::Kernel("eth0".into()));
        assert!(!iface.needs_bind());
        assert!(db.lookups().is_empty());
        Ok(())
    }

    #[test]
    fn kernel_descriptor_rejects_pci_oids() {
        let db = MockDb::default();
        let res = Interface::from_oid(&db, "/agent:Agt_A/hardware:/pci:/device:0000:00:04.0", true);
        assert!(matches!(
            res,
            Err(Error::Oid(OidError::NotAnInterface(_)))
        ));
    }

    #[test]
    fn pci_descriptors_resolve_through_the_db() -> anyhow::Result<()> {
        let db = MockDb::default()
            .with_interface("eth1", PciAddr::new(0, 0, 5, 0))
            .with_device(PciAddr::new(0, 0, 4, 0), "virtio-pci")
            .with_instance("8086", "1572", PciAddr::new(0, 0x3b, 0, 1));
        let bdf = Interface::pci_by_bdf(&db, "Agt_A", "0000:00:04.0")?;
        assert!(bdf.needs_bind());
        assert_eq!(bdf.to_string(), "0000:00:04.0");
        let by_name = Interface::pci_by_iface(&db, "Agt_A", "eth1")?;
        assert_eq!(by_name.pci_addr(), Some(PciAddr::new(0, 0, 5, 0)));
        let by_id = Interface::from_oid(
            &db,
            "/agent:Agt_A/hardware:/pci:/vendor:8086/device:1572/instance:0",
            false,
        )?;
        assert_eq!(by_id.to_string(), "0000:3b:00.1");
        Ok(())
    }

    #[test]
    fn lookup_misses_are_not_found() {
        let db = MockDb::default();
        let err = Interface::pci_by_bdf(&db, "Agt_A", "0000:00:09.0").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        let err = Interface::from_oid(&db, "/agent:Agt_A/bogus:x", false).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn release_restores_the_previous_driver() -> anyhow::Result<()> {
        let addr = PciAddr::new(0, 0, 4, 0);
        let db = MockDb::default().with_device(addr, "virtio-pci");
        let binding = bind(&db, "Agt_A", addr, "vfio-pci")?;
        assert_eq!(db.driver_of(addr).as_deref(), Some("vfio-pci"));
        // Rebinding the same driver changes nothing.
        let again = bind(&db, "Agt_A", addr, "vfio-pci")?;
        release(&db, "Agt_A", &again)?;
        assert_eq!(db.driver_of(addr).as_deref(), Some("vfio-pci"));
        release(&db, "Agt_A", &binding)?;
        assert_eq!(db.driver_of(addr).as_deref(), Some("virtio-pci"));
        Ok(())
    }
}
