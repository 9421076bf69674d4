//! Rendering of the generator's device configuration (YAML) and traffic profile (JSON).

use std::path::PathBuf;

use itertools::{EitherOrBoth, Itertools};
use rand::Rng;

use crate::addr::PortAddr;
use crate::expand::{expand, ExpandError};
use crate::kvpairs::KvPairs;
use crate::opts::{
    EndpointConfig, TrexOpts, DEFAULT_CLIENT_PAYLOAD, DEFAULT_PORT, DEFAULT_SERVER_PAYLOAD,
};

/// Name of the generator's placeholder port.
pub const DUMMY_IFACE: &str = "dummy";

/// Device configuration used when [`TrexOpts::cfg_template`] is unset.
///
/// There is one `port_info` entry per port, in port order. Ports configured with MAC
/// addresses get `dest_mac`/`src_mac`, the others `ip`/`default_gw`.
pub const DEFAULT_CFG_TEMPLATE: &str = "\
- port_limit      : ${#IFACES}
  version         : 2
  interfaces: [${IFACES[, ]}]
  low_end: true
  port_info:
${IFACES*${PORTINFO_IP[${}]|notempty:+    - ip${COLON} ${PORTINFO_IP[${}]}
      default_gw${COLON} ${PORTINFO_DEFAULT_GW[${}]}
}${PORTINFO_SRC_MAC[${}]|notempty:+    - dest_mac${COLON} ${PORTINFO_DST_MAC[${}]}
      src_mac${COLON} ${PORTINFO_SRC_MAC[${}]}
}}";

/// Returns the endpoint behind every generator port, in port order.
///
/// Clients and servers are paired by index, and each pair occupies two consecutive ports
/// with the client first. `None` is a dummy port filling in for the shorter list.
pub(crate) fn ports(opts: &TrexOpts) -> Vec<Option<&EndpointConfig>> {
    opts.clients
        .iter()
        .zip_longest(&opts.servers)
        .flat_map(|pair| match pair {
            EitherOrBoth::Both(client, server) => [Some(client), Some(server)],
            EitherOrBoth::Left(client) => [Some(client), None],
            EitherOrBoth::Right(server) => [None, Some(server)],
        })
        .collect()
}

/// Variables of the device configuration template.
///
/// Every port has a value under each `PORTINFO_*` key, so the values of a port share its
/// index. The keys of the address family the port does not use are empty.
pub(crate) fn device_vars(opts: &TrexOpts) -> KvPairs {
    let mut vars = KvPairs::new();
    // The expander treats ':' inside a reference as a modifier.
    vars.push("COLON", ":");
    for endpoint in ports(opts) {
        let iface = endpoint.and_then(|e| e.interface.as_ref());
        vars.push(
            "IFACES",
            iface.map_or_else(|| DUMMY_IFACE.to_owned(), |iface| format!("'{iface}'")),
        );
        let ip = endpoint.and_then(|e| e.ip);
        let gw = endpoint.and_then(|e| e.gw);
        let ip_str = ip.unwrap_or(PortAddr::UNSPECIFIED).to_string();
        let gw_str = gw.unwrap_or(PortAddr::UNSPECIFIED).to_string();
        let (link, network) = match ip {
            Some(PortAddr::Mac(_)) => ((ip_str, gw_str), Default::default()),
            _ => (Default::default(), (ip_str, gw_str)),
        };
        vars.push("PORTINFO_IP", network.0);
        vars.push("PORTINFO_DEFAULT_GW", network.1);
        vars.push("PORTINFO_SRC_MAC", link.0);
        vars.push("PORTINFO_DST_MAC", link.1);
    }
    vars
}

/// Variables of the traffic profile template: generated endpoint variables followed by the
/// user's own.
pub(crate) fn astf_vars(opts: &TrexOpts) -> KvPairs {
    let mut vars = KvPairs::new();
    push_endpoint_vars(&mut vars, "CLIENT", DEFAULT_CLIENT_PAYLOAD, &opts.clients);
    push_endpoint_vars(&mut vars, "SERVER", DEFAULT_SERVER_PAYLOAD, &opts.servers);
    vars.extend_from(&opts.astf_vars);
    vars
}

fn push_endpoint_vars(
    vars: &mut KvPairs,
    role: &str,
    default_payload: &str,
    endpoints: &[EndpointConfig],
) {
    let or_unspec = |ip: Option<std::net::IpAddr>| {
        ip.map_or_else(|| PortAddr::UNSPECIFIED.to_string(), |ip| ip.to_string())
    };
    for e in endpoints {
        vars.push(
            format!("{role}_HTTP"),
            e.payload.as_deref().unwrap_or(default_payload),
        );
        vars.push(format!("{role}_IP_START"), or_unspec(e.ip_range_beg));
        vars.push(format!("{role}_IP_END"), or_unspec(e.ip_range_end));
        vars.push(format!("{role}_IP_OFFSET"), or_unspec(e.ip_offset));
        vars.push(
            format!("{role}_IP_PORT"),
            e.port.unwrap_or(DEFAULT_PORT).to_string(),
        );
    }
}

/// Renders the device configuration.
pub(crate) fn render_device_config(opts: &TrexOpts) -> Result<String, ExpandError> {
    let template = opts.cfg_template.as_deref().unwrap_or(DEFAULT_CFG_TEMPLATE);
    expand(template, &device_vars(opts))
}

/// Renders the traffic profile.
pub(crate) fn render_astf_profile(opts: &TrexOpts) -> Result<String, ExpandError> {
    expand(&opts.astf_template, &astf_vars(opts))
}

/// A fresh path for the device configuration.
pub(crate) fn yaml_path() -> PathBuf {
    let name = rand::thread_rng().gen::<u64>();
    PathBuf::from(format!("/tmp/{name:016x}.yaml"))
}

/// The path of the traffic profile; the instance prefix keeps concurrent instances apart.
pub(crate) fn astf_path(prefix: Option<&str>) -> PathBuf {
    match prefix {
        Some(prefix) => PathBuf::from(format!("/tmp/astf-{prefix}.json")),
        None => PathBuf::from("/tmp/astf.json"),
    }
}
