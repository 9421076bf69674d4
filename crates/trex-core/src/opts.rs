//! This module defines the [`TrexOpts`] configuration which describes how to launch the
//! generator and which ports and traffic endpoints it drives.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::addr::PortAddr;
use crate::iface::Interface;
use crate::kvpairs::KvPairs;

/// Payload a client sends when none is configured.
pub const DEFAULT_CLIENT_PAYLOAD: &str = "GET /3384 HTTP/1.1\nHo";

/// Payload a server answers with when none is configured.
pub const DEFAULT_SERVER_PAYLOAD: &str = "HTTP/1.1 200 OK\nServe";

/// Port used when an endpoint does not set one.
pub const DEFAULT_PORT: u16 = 80;

/// A traffic endpoint: one generator port plus the addresses it emulates.
///
/// Clients and servers share this shape; the role is given by the list the endpoint is in.
#[derive(Debug, Clone, Default, PartialEq, typed_builder::TypedBuilder)]
pub struct EndpointConfig {
    /// First address of the emulated range.
    #[builder(default, setter(strip_option))]
    pub ip_range_beg: Option<IpAddr>,
    /// Last address of the emulated range.
    #[builder(default, setter(strip_option))]
    pub ip_range_end: Option<IpAddr>,
    /// Per-port offset added to the range.
    #[builder(default, setter(strip_option))]
    pub ip_offset: Option<IpAddr>,
    /// TCP port; defaults to [`DEFAULT_PORT`].
    #[builder(default, setter(strip_option))]
    pub port: Option<u16>,
    /// Application payload; defaults to a canned HTTP request or response.
    #[builder(default, setter(strip_option, into))]
    pub payload: Option<String>,
    /// The NIC; `None` is the generator's dummy port.
    #[builder(default, setter(strip_option))]
    pub interface: Option<Interface>,
    /// Local address of the port.
    #[builder(default, setter(strip_option, into))]
    pub ip: Option<PortAddr>,
    /// Gateway of the port.
    #[builder(default, setter(strip_option, into))]
    pub gw: Option<PortAddr>,
}

/// Generator verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbose {
    /// Debug output at startup only.
    Min,
    /// Debug output during the whole run.
    Max,
}

/// Generator console IO mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Iom {
    /// No periodic output.
    Silent,
    /// Full periodic output, including per-port counters.
    Normal,
    /// Abbreviated periodic output.
    Short,
}

/// Vendor driver shared objects to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SharedObject {
    /// Mellanox ConnectX-3.
    Mlx4,
    /// Mellanox ConnectX-4 and later.
    Mlx5,
    /// Both Mellanox drivers.
    Mlx4Mlx5,
    /// Napatech.
    Ntacc,
    /// Broadcom.
    Bnxt,
}

/// Generator options.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct TrexOpts {
    /// Path of the generator executable on the agent.
    #[builder(setter(into))]
    pub exec: PathBuf,
    /// Traffic profile template (JSON).
    #[builder(setter(into))]
    pub astf_template: String,
    /// Device configuration template (YAML); a built-in template is used when unset.
    #[builder(default, setter(strip_option, into))]
    pub cfg_template: Option<String>,
    /// Userspace driver PCI ports are bound to. Ports are left alone when unset.
    #[builder(default, setter(strip_option, into))]
    pub driver: Option<String>,
    /// Instance prefix, which lets several generators share a host.
    #[builder(default, setter(strip_option, into))]
    pub instance_prefix: Option<String>,
    /// Client endpoints.
    #[builder(default)]
    pub clients: Vec<EndpointConfig>,
    /// Server endpoints.
    #[builder(default)]
    pub servers: Vec<EndpointConfig>,
    /// Extra variables for the traffic profile template.
    #[builder(default)]
    pub astf_vars: KvPairs,

    /// Run as a server only.
    #[builder(default)]
    pub astf_server_only: bool,
    /// Number of data-path threads per port pair.
    #[builder(default, setter(strip_option))]
    pub n_threads: Option<u32>,
    /// Disable TCP segmentation offload.
    #[builder(default)]
    pub tso_disable: bool,
    /// Disable large receive offload.
    #[builder(default)]
    pub lro_disable: bool,
    /// Test duration in seconds.
    #[builder(default, setter(strip_option))]
    pub duration: Option<f64>,
    /// Swap client and server sides on odd ports.
    #[builder(default)]
    pub asymmetric_traffic_flow: bool,
    /// Collect HDR latency histograms.
    #[builder(default)]
    pub use_hdr_histograms: bool,
    /// Use IPv6.
    #[builder(default)]
    pub ipv6: bool,
    /// Rate multiplier.
    #[builder(default, setter(strip_option))]
    pub rate_multiplier: Option<u32>,
    /// Terminate without waiting for open flows.
    #[builder(default)]
    pub force_close_at_end: bool,
    /// Leave the NIC flow-control setting unchanged.
    #[builder(default)]
    pub enable_flow_control: bool,
    /// Disable the watchdog.
    #[builder(default)]
    pub no_watchdog: bool,
    /// Run with realtime priority.
    #[builder(default)]
    pub use_realtime_prio: bool,
    /// Disable monitor publishers.
    #[builder(default)]
    pub no_monitors: bool,
    /// Drop packets instead of retrying when queues are full.
    #[builder(default)]
    pub dont_resend_pkts: bool,
    /// Sleep instead of busy-polling.
    #[builder(default)]
    pub use_sleep: bool,
    /// Verbosity.
    #[builder(default, setter(strip_option))]
    pub verbose: Option<Verbose>,
    /// Console IO mode.
    #[builder(default, setter(strip_option))]
    pub iom: Option<Iom>,
    /// Driver shared objects.
    #[builder(default, setter(strip_option))]
    pub so: Option<SharedObject>,
    /// Seconds to wait before sending traffic.
    #[builder(default, setter(strip_option))]
    pub init_wait_sec: Option<u32>,

    /// Level the child's stdout is logged at.
    #[builder(default = log::Level::Info)]
    pub stdout_log_level: log::Level,
    /// Level the child's stderr is logged at.
    #[builder(default = log::Level::Warn)]
    pub stderr_log_level: log::Level,
}

impl TrexOpts {
    /// The instance prefix, if set to a non-empty string.
    pub fn prefix(&self) -> Option<&str> {
        self.instance_prefix.as_deref().filter(|p| !p.is_empty())
    }

    /// Returns `true` if the generator prints per-port counters.
    pub fn per_port_stats(&self) -> bool {
        self.iom == Some(Iom::Normal)
    }
}
