//! The configuration-database capability.

use crate::addr::PciAddr;

/// Resolves interface names and PCI functions on test agents, and rebinds PCI drivers.
pub trait ConfigDb {
    /// Returns the PCI function backing the kernel interface `ifname`.
    fn interface_pci_addr(&self, agent: &str, ifname: &str) -> Result<PciAddr, DbError>;

    /// Checks that the PCI function `addr` exists and returns it.
    fn device_pci_addr(&self, agent: &str, addr: PciAddr) -> Result<PciAddr, DbError>;

    /// Returns the `instance`-th PCI function (in address order) with the given IDs.
    fn instance_pci_addr(
        &self,
        agent: &str,
        vendor: &str,
        device: &str,
        instance: u32,
    ) -> Result<PciAddr, DbError>;

    /// Returns the driver currently bound to `addr`, if any.
    fn pci_driver(&self, agent: &str, addr: PciAddr) -> Result<Option<String>, DbError>;

    /// Binds `addr` to `driver`, unbinding it from its current driver first.
    fn bind_driver(&self, agent: &str, addr: PciAddr, driver: &str) -> Result<(), DbError>;

    /// Unbinds `addr` from its current driver.
    fn unbind_driver(&self, agent: &str, addr: PciAddr) -> Result<(), DbError>;
}

/// Error accessing the configuration database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No object matches the request.
    #[error("{0} not found")]
    NotFound(String),

    /// The kernel refused to rebind a PCI function.
    #[error("failed to bind {addr} to {driver}")]
    Refused {
        /// The PCI function.
        addr: PciAddr,
        /// The requested driver.
        driver: String,
        /// The underlying reason.
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
