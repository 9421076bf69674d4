//! Hardware and port addresses.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// A PCI function address (`domain:bus:device.function`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct PciAddr {
    /// PCI domain.
    pub domain: u16,
    /// Bus number.
    pub bus: u8,
    /// Device number (5 bits).
    pub dev: u8,
    /// Function number (3 bits).
    pub func: u8,
}

impl PciAddr {
    /// Creates a new PCI address.
    pub const fn new(domain: u16, bus: u8, dev: u8, func: u8) -> Self {
        Self {
            domain,
            bus,
            dev,
            func,
        }
    }
}

impl fmt::Display for PciAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.dev, self.func
        )
    }
}

impl FromStr for PciAddr {
    type Err = AddrError;

    /// Parses `dddd:bb:dd.f`, or `bb:dd.f` in domain 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddrError::InvalidPci(s.to_owned());
        let (slot, func) = s.rsplit_once('.').ok_or_else(invalid)?;
        let mut parts = slot.rsplit(':');
        let dev = parts.next().ok_or_else(invalid)?;
        let bus = parts.next().ok_or_else(invalid)?;
        let domain = parts.next().unwrap_or("0");
        if parts.next().is_some() {
            return Err(invalid());
        }
        let addr = PciAddr {
            domain: u16::from_str_radix(domain, 16).map_err(|_| invalid())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| invalid())?,
            dev: u8::from_str_radix(dev, 16).map_err(|_| invalid())?,
            func: u8::from_str_radix(func, 16).map_err(|_| invalid())?,
        };
        if addr.dev > 0x1f || addr.func > 0x7 {
            return Err(invalid());
        }
        Ok(addr)
    }
}

impl TryFrom<String> for PciAddr {
    type Error = AddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PciAddr> for String {
    fn from(addr: PciAddr) -> Self {
        addr.to_string()
    }
}

/// An Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddrError::InvalidMac(s.to_owned());
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

/// The address a generator port answers to, or talks to.
///
/// A MAC address selects link-layer port configuration (`src_mac`/`dest_mac`); an IP address
/// selects network-layer configuration (`ip`/`default_gw`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortAddr {
    /// An IPv4 or IPv6 address.
    Ip(IpAddr),
    /// A link-layer address.
    Mac(MacAddr),
}

impl PortAddr {
    /// The unspecified IPv4 address, used when no address is configured.
    pub const UNSPECIFIED: PortAddr = PortAddr::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    /// Returns `true` for link-layer addresses.
    pub fn is_mac(&self) -> bool {
        matches!(self, PortAddr::Mac(_))
    }
}

impl fmt::Display for PortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortAddr::Ip(ip) => ip.fmt(f),
            PortAddr::Mac(mac) => mac.fmt(f),
        }
    }
}

impl FromStr for PortAddr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(PortAddr::Ip(ip));
        }
        s.parse::<MacAddr>()
            .map(PortAddr::Mac)
            .map_err(|_| AddrError::InvalidPortAddr(s.to_owned()))
    }
}

impl From<IpAddr> for PortAddr {
    fn from(ip: IpAddr) -> Self {
        PortAddr::Ip(ip)
    }
}

impl From<MacAddr> for PortAddr {
    fn from(mac: MacAddr) -> Self {
        PortAddr::Mac(mac)
    }
}

impl TryFrom<String> for PortAddr {
    type Error = AddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortAddr> for String {
    fn from(addr: PortAddr) -> Self {
        addr.to_string()
    }
}

/// Error parsing an address.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    /// Malformed PCI address.
    #[error("invalid PCI address {0:?}")]
    InvalidPci(String),

    /// Malformed MAC address.
    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),

    /// Neither an IP nor a MAC address.
    #[error("invalid port address {0:?}")]
    InvalidPortAddr(String),
}
