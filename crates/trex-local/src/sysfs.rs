//! A configuration database over sysfs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use trex_core::{ConfigDb, DbError, PciAddr};

const SYSFS_ROOT: &str = "/sys";

/// Resolves interfaces and binds PCI drivers through the sysfs tree under `root`.
///
/// Agent names are not checked: every agent is this host.
#[derive(Debug, Clone)]
pub struct SysfsDb {
    root: PathBuf,
}

impl SysfsDb {
    /// Creates a database over the sysfs tree mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn devices(&self) -> PathBuf {
        self.root.join("bus/pci/devices")
    }

    fn device_dir(&self, addr: PciAddr) -> Result<PathBuf, DbError> {
        let dir = self.devices().join(addr.to_string());
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(DbError::NotFound(format!("PCI function {addr}")))
        }
    }
}

impl Default for SysfsDb {
    fn default() -> Self {
        Self::new(SYSFS_ROOT)
    }
}

/// Normalizes a vendor or device ID: sysfs prints `0x8086`, users write `8086`.
fn normalize_id(id: &str) -> String {
    id.trim().trim_start_matches("0x").to_ascii_lowercase()
}

fn read_id(path: &Path) -> io::Result<String> {
    Ok(normalize_id(&fs::read_to_string(path)?))
}

/// The final component of a symlink's target.
fn link_name(path: &Path) -> io::Result<Option<String>> {
    match fs::read_link(path) {
        Ok(target) => Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl ConfigDb for SysfsDb {
    fn interface_pci_addr(&self, _agent: &str, ifname: &str) -> Result<PciAddr, DbError> {
        let link = self.root.join("class/net").join(ifname).join("device");
        link_name(&link)?
            .and_then(|name| name.parse().ok())
            .ok_or_else(|| DbError::NotFound(format!("PCI function of interface {ifname}")))
    }

    fn device_pci_addr(&self, _agent: &str, addr: PciAddr) -> Result<PciAddr, DbError> {
        self.device_dir(addr).map(|_| addr)
    }

    fn instance_pci_addr(
        &self,
        _agent: &str,
        vendor: &str,
        device: &str,
        instance: u32,
    ) -> Result<PciAddr, DbError> {
        let (vendor_id, device_id) = (normalize_id(vendor), normalize_id(device));
        let mut matching = Vec::new();
        for entry in fs::read_dir(self.devices())? {
            let entry = entry?;
            let Some(addr) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<PciAddr>().ok())
            else {
                continue;
            };
            let dir = entry.path();
            if read_id(&dir.join("vendor"))? == vendor_id
                && read_id(&dir.join("device"))? == device_id
            {
                matching.push(addr);
            }
        }
        matching.sort();
        matching
            .get(instance as usize)
            .copied()
            .ok_or_else(|| {
                DbError::NotFound(format!("instance {instance} of PCI device {vendor}:{device}"))
            })
    }

    fn pci_driver(&self, _agent: &str, addr: PciAddr) -> Result<Option<String>, DbError> {
        let dir = self.device_dir(addr)?;
        Ok(link_name(&dir.join("driver"))?)
    }

    fn bind_driver(&self, _agent: &str, addr: PciAddr, driver: &str) -> Result<(), DbError> {
        let dir = self.device_dir(addr)?;
        let bdf = addr.to_string();
        let refused = |source: io::Error| DbError::Refused {
            addr,
            driver: driver.to_owned(),
            source,
        };
        if dir.join("driver").exists() {
            fs::write(dir.join("driver/unbind"), &bdf).map_err(refused)?;
        }
        fs::write(dir.join("driver_override"), driver).map_err(refused)?;
        fs::write(self.root.join("bus/pci/drivers_probe"), &bdf).map_err(refused)?;
        log::debug!("{bdf}: probed with driver override {driver}");
        Ok(())
    }

    fn unbind_driver(&self, _agent: &str, addr: PciAddr) -> Result<(), DbError> {
        let dir = self.device_dir(addr)?;
        if dir.join("driver").exists() {
            fs::write(dir.join("driver/unbind"), addr.to_string())?;
        }
        // An empty override lets the kernel pick the driver again.
        fs::write(dir.join("driver_override"), "\n")?;
        Ok(())
    }
}
