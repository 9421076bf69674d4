//! Utilities for driving the TRex driver from files.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use trex_core::{
    ConfigDb, EndpointConfig, Interface, Iom, KvPairs, PortAddr, SharedObject, TrexOpts, Verbose,
};

/// Reads [`TrexOpts`] from a file containing a [`RunSpec`] in JSON or Dhall format.
///
/// Interfaces are resolved through `db`, and `@path` templates are read relative to the
/// directory of the run spec.
pub fn read_opts(run_spec: impl AsRef<Path>, db: &dyn ConfigDb) -> Result<TrexOpts, Error> {
    let path = run_spec.as_ref();
    let spec = read_run_spec(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    spec.into_opts(db, base)
}

/// Reads a [`RunSpec`] from a file in JSON or Dhall format.
pub fn read_run_spec(path: impl AsRef<Path>) -> Result<RunSpec, Error> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let spec: RunSpec = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("dhall") => serde_dhall::from_str(&contents).parse().map_err(Box::new)?,
        _ => return Err(Error::UnknownFileType(path.into())),
    };
    Ok(spec)
}

/// A generator run specification.
///
/// Template fields hold the template text, or `@` followed by the path of a file holding it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunSpec {
    /// Path of the generator executable.
    pub exec: PathBuf,
    /// Traffic profile template.
    pub astf_template: String,
    /// Device configuration template; the built-in one is used when unset.
    #[serde(default)]
    pub cfg_template: Option<String>,
    /// Userspace driver to bind PCI ports to.
    #[serde(default)]
    pub driver: Option<String>,
    /// Instance prefix.
    #[serde(default)]
    pub instance_prefix: Option<String>,
    /// Client endpoints.
    #[serde(default)]
    pub clients: Vec<EndpointSpec>,
    /// Server endpoints.
    #[serde(default)]
    pub servers: Vec<EndpointSpec>,
    /// Extra traffic profile variables, in order.
    #[serde(default)]
    pub vars: Vec<Var>,
    /// Generator knobs.
    #[serde(default)]
    pub generator: GeneratorSpec,
}

/// A traffic endpoint.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EndpointSpec {
    /// First emulated address.
    pub ip_range_beg: Option<IpAddr>,
    /// Last emulated address.
    pub ip_range_end: Option<IpAddr>,
    /// Per-port address offset.
    pub ip_offset: Option<IpAddr>,
    /// TCP port.
    pub port: Option<u16>,
    /// Payload.
    pub payload: Option<String>,
    /// The NIC; the generator's dummy port when unset.
    pub interface: Option<InterfaceSpec>,
    /// Local IP or MAC address.
    pub ip: Option<PortAddr>,
    /// Gateway IP or MAC address.
    pub gw: Option<PortAddr>,
}

/// A NIC given by OID.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InterfaceSpec {
    /// The OID, e.g. `/agent:Agt_A/interface:eth0`.
    pub oid: String,
    /// Use the kernel interface as is instead of its PCI function.
    #[serde(default)]
    pub kernel: bool,
}

/// A traffic profile variable.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Var {
    /// Variable name.
    pub name: String,
    /// Value.
    pub value: String,
}

/// Generator knobs. See [`TrexOpts`] for their meaning.
#[allow(missing_docs)]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GeneratorSpec {
    pub astf_server_only: bool,
    pub n_threads: Option<u32>,
    pub tso_disable: bool,
    pub lro_disable: bool,
    pub duration: Option<f64>,
    pub asymmetric_traffic_flow: bool,
    pub use_hdr_histograms: bool,
    pub ipv6: bool,
    pub rate_multiplier: Option<u32>,
    pub force_close_at_end: bool,
    pub enable_flow_control: bool,
    pub no_watchdog: bool,
    pub use_realtime_prio: bool,
    pub no_monitors: bool,
    pub dont_resend_pkts: bool,
    pub use_sleep: bool,
    pub verbose: Option<Verbose>,
    pub iom: Option<Iom>,
    pub so: Option<SharedObject>,
    pub init_wait_sec: Option<u32>,
    pub stdout_log_level: log::Level,
    pub stderr_log_level: log::Level,
}

impl Default for GeneratorSpec {
    fn default() -> Self {
        Self {
            astf_server_only: false,
            n_threads: None,
            tso_disable: false,
            lro_disable: false,
            duration: None,
            asymmetric_traffic_flow: false,
            use_hdr_histograms: false,
            ipv6: false,
            rate_multiplier: None,
            force_close_at_end: false,
            enable_flow_control: false,
            no_watchdog: false,
            use_realtime_prio: false,
            no_monitors: false,
            dont_resend_pkts: false,
            use_sleep: false,
            verbose: None,
            iom: None,
            so: None,
            init_wait_sec: None,
            stdout_log_level: log::Level::Info,
            stderr_log_level: log::Level::Warn,
        }
    }
}

impl RunSpec {
    /// Resolves the spec into generator options. `@path` templates are read relative to
    /// `base`.
    pub fn into_opts(self, db: &dyn ConfigDb, base: &Path) -> Result<TrexOpts, Error> {
        let endpoints = |specs: Vec<EndpointSpec>| {
            specs
                .into_iter()
                .map(|spec| spec.into_config(db))
                .collect::<Result<Vec<_>, Error>>()
        };
        let g = self.generator;
        Ok(TrexOpts {
            exec: self.exec,
            astf_template: load_template(&self.astf_template, base)?,
            cfg_template: self
                .cfg_template
                .map(|t| load_template(&t, base))
                .transpose()?,
            driver: self.driver,
            instance_prefix: self.instance_prefix,
            clients: endpoints(self.clients)?,
            servers: endpoints(self.servers)?,
            astf_vars: self
                .vars
                .into_iter()
                .map(|v| (v.name, v.value))
                .collect::<KvPairs>(),
            astf_server_only: g.astf_server_only,
            n_threads: g.n_threads,
            tso_disable: g.tso_disable,
            lro_disable: g.lro_disable,
            duration: g.duration,
            asymmetric_traffic_flow: g.asymmetric_traffic_flow,
            use_hdr_histograms: g.use_hdr_histograms,
            ipv6: g.ipv6,
            rate_multiplier: g.rate_multiplier,
            force_close_at_end: g.force_close_at_end,
            enable_flow_control: g.enable_flow_control,
            no_watchdog: g.no_watchdog,
            use_realtime_prio: g.use_realtime_prio,
            no_monitors: g.no_monitors,
            dont_resend_pkts: g.dont_resend_pkts,
            use_sleep: g.use_sleep,
            verbose: g.verbose,
            iom: g.iom,
            so: g.so,
            init_wait_sec: g.init_wait_sec,
            stdout_log_level: g.stdout_log_level,
            stderr_log_level: g.stderr_log_level,
        })
    }
}

impl EndpointSpec {
    fn into_config(self, db: &dyn ConfigDb) -> Result<EndpointConfig, Error> {
        let interface = self
            .interface
            .map(|i| Interface::from_oid(db, &i.oid, i.kernel))
            .transpose()?;
        Ok(EndpointConfig {
            ip_range_beg: self.ip_range_beg,
            ip_range_end: self.ip_range_end,
            ip_offset: self.ip_offset,
            port: self.port,
            payload: self.payload,
            interface,
            ip: self.ip,
            gw: self.gw,
        })
    }
}

fn load_template(template: &str, base: &Path) -> Result<String, Error> {
    match template.strip_prefix('@') {
        Some(path) => {
            let path = base.join(path);
            log::debug!("reading template {}", path.display());
            std::fs::read_to_string(&path).map_err(|source| Error::Template { path, source })
        }
        None => Ok(template.to_owned()),
    }
}

/// Error kinds for run specifications and I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown file type.
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    /// A template file cannot be read.
    #[error("failed to read template {path}")]
    Template {
        /// The template file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Error deserializing Dhall.
    #[error("Dhall error")]
    Dhall(#[from] Box<serde_dhall::Error>),

    /// Error deserializing JSON.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error")]
    Io(#[from] io::Error),

    /// Error resolving an interface.
    #[error("invalid interface")]
    Trex(#[from] trex_core::Error),
}
