//! The line filters extracting statistics from the generator's console output.

use crate::job::{FilterDesc, FilterId, Stream};
use crate::opts::TrexOpts;
use crate::report::PortParam;

const TOTAL_TX_RE: &str = r"Total-Tx\s+:\s+([0-9]+\.[0-9]{2}\s.)bps";
const TOTAL_RX_RE: &str = r"Total-Rx\s+:\s+([0-9]+\.[0-9]{2}\s.)bps";
const TOTAL_CPS_RE: &str = r"Total-CPS\s+:\s+([0-9]+\.[0-9]{2}\s.)cps";
const TOTAL_TX_PKT_RE: &str = r"Total-tx-pkt\s+:\s+([0-9]+)\s+pkts";
const TOTAL_RX_PKT_RE: &str = r"Total-rx-pkt\s+:\s+([0-9]+)\s+pkts";
const M_TRAFFIC_DURATION_RE: &str = r"\s+m_traffic_duration\s+\|\s+([0-9]+\.[0-9]{2})\s+sec\s+\|\s+([0-9]+\.[0-9]{2})\s+sec\s+\|\s+measured traffic duration";

/// Name of the tee logging the generator's stdout.
pub const STDOUT_TEE: &str = "TRex stdout";

/// Name of the tee logging the generator's stderr.
pub const STDERR_TEE: &str = "TRex stderr";

/// Handles of the readable filters of a generator job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FilterSet {
    pub(crate) total_tx: FilterId,
    pub(crate) total_rx: FilterId,
    pub(crate) total_cps: FilterId,
    pub(crate) total_tx_pkt: FilterId,
    pub(crate) total_rx_pkt: FilterId,
    pub(crate) m_traff_dur_client: FilterId,
    pub(crate) m_traff_dur_server: FilterId,
    pub(crate) per_port: Option<PerPortFilters>,
}

/// Per-port counter filters: `ids[p][k]` reads [`PortParam::ALL`]`[k]` of port `p`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PerPortFilters {
    pub(crate) ids: Vec<[FilterId; PortParam::COUNT]>,
}

impl FilterSet {
    /// Every readable filter.
    pub(crate) fn ids(&self) -> impl Iterator<Item = FilterId> + '_ {
        [
            self.total_tx,
            self.total_rx,
            self.total_cps,
            self.total_tx_pkt,
            self.total_rx_pkt,
            self.m_traff_dur_client,
            self.m_traff_dur_server,
        ]
        .into_iter()
        .chain(self.per_port.iter().flat_map(|p| p.ids.iter().flatten().copied()))
    }
}

impl PerPortFilters {
    pub(crate) fn n_ports(&self) -> usize {
        self.ids.len()
    }
}

/// Declares the filters of a generator with `n_ports` ports.
///
/// Per-port counters are only printed in the normal IO mode, so per-port filters are only
/// declared then.
pub(crate) fn filter_set(opts: &TrexOpts, n_ports: usize) -> (Vec<FilterDesc>, FilterSet) {
    let mut descs = Vec::new();
    let mut add = |desc: FilterDesc| {
        descs.push(desc);
        FilterId::new(descs.len() - 1)
    };
    let mut extract = |name: &str, pattern: &str, group: usize| {
        add(FilterDesc::builder()
            .name(name)
            .pattern(pattern)
            .extract(group)
            .build())
    };
    let total_tx = extract("total_tx", TOTAL_TX_RE, 1);
    let total_rx = extract("total_rx", TOTAL_RX_RE, 1);
    let total_cps = extract("total_cps", TOTAL_CPS_RE, 1);
    let total_tx_pkt = extract("total_tx_pkt", TOTAL_TX_PKT_RE, 1);
    let total_rx_pkt = extract("total_rx_pkt", TOTAL_RX_PKT_RE, 1);
    let m_traff_dur_client = extract("m_traff_dur_client", M_TRAFFIC_DURATION_RE, 1);
    let m_traff_dur_server = extract("m_traff_dur_server", M_TRAFFIC_DURATION_RE, 2);
    let per_port = opts.per_port_stats().then(|| PerPortFilters {
        ids: (0..n_ports)
            .map(|port| {
                PortParam::ALL.map(|param| {
                    let (pattern, group) = port_pattern(param, port, n_ports);
                    extract(&format!("port {port} {}", param.name()), &pattern, group)
                })
            })
            .collect(),
    });
    let tee = |name: &str, stream: Stream, level: log::Level| {
        FilterDesc::builder()
            .name(name)
            .stream(stream)
            .readable(false)
            .log_level(level)
            .build()
    };
    descs.push(tee(STDOUT_TEE, Stream::Stdout, opts.stdout_log_level));
    descs.push(tee(STDERR_TEE, Stream::Stderr, opts.stderr_log_level));
    let set = FilterSet {
        total_tx,
        total_rx,
        total_cps,
        total_tx_pkt,
        total_rx_pkt,
        m_traff_dur_client,
        m_traff_dur_server,
        per_port,
    };
    (descs, set)
}

/// The pattern reading `param` of `port`, and its capture group.
///
/// Counter rows list one value per port after the counter name; the time rows hold a single
/// value shared by every port.
fn port_pattern(param: PortParam, port: usize, n_ports: usize) -> (String, usize) {
    if param.is_time() {
        let pattern = format!(r"(?i)^\s*{}\s*:\s*([0-9]+(?:\.[0-9]+)?)\s*sec", param.name());
        (pattern, 1)
    } else {
        let values = r"[\s|]+([0-9]+)".repeat(n_ports);
        let pattern = format!(r"^\s*{}{values}[\s|]*$", param.name());
        (pattern, port + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::LineFilter;
    use crate::opts::Iom;

    fn opts(iom: Option<Iom>) -> TrexOpts {
        TrexOpts {
            iom,
            ..TrexOpts::builder()
                .exec("/opt/trex/t-rex-64")
                .astf_template("{}")
                .build()
        }
    }

    fn compile(descs: &[FilterDesc], id: FilterId) -> LineFilter {
        LineFilter::new(descs[id.inner()].clone()).unwrap()
    }

    #[test]
    fn per_port_filters_need_normal_io_mode() {
        let (descs, set) = filter_set(&opts(None), 2);
        assert!(set.per_port.is_none());
        assert_eq!(descs.len(), 9);
        let (_, set) = filter_set(&opts(Some(Iom::Short)), 2);
        assert!(set.per_port.is_none());
        let (descs, set) = filter_set(&opts(Some(Iom::Normal)), 2);
        let per_port = set.per_port.unwrap();
        assert_eq!(per_port.n_ports(), 2);
        assert_eq!(descs.len(), 9 + 2 * PortParam::COUNT);
        assert_eq!(descs[per_port.ids[1][0].inner()].name, "port 1 opackets");
        assert_eq!(descs[per_port.ids[0][6].inner()].name, "port 0 current time");
    }

    #[test]
    fn tees_log_at_configured_levels() {
        let opts = TrexOpts {
            stdout_log_level: log::Level::Debug,
            ..opts(None)
        };
        let (descs, _) = filter_set(&opts, 0);
        let stdout = descs.iter().find(|d| d.name == STDOUT_TEE).unwrap();
        assert_eq!(stdout.log_level, Some(log::Level::Debug));
        assert!(!stdout.readable);
        let stderr = descs.iter().find(|d| d.name == STDERR_TEE).unwrap();
        assert_eq!(stderr.stream, Stream::Stderr);
        assert_eq!(stderr.log_level, Some(log::Level::Warn));
    }

    #[test]
    fn summary_filters_match_generator_output() {
        let (descs, set) = filter_set(&opts(None), 2);
        let cases = [
            (set.total_tx, " Total-Tx        :       2.62 Mbps  ", "2.62 M"),
            (set.total_rx, " Total-Rx        :     512.00 Kbps  ", "512.00 K"),
            (set.total_cps, " Total-CPS       :      53.93  cps  ", "53.93  "),
            (set.total_tx_pkt, " Total-tx-pkt    :    1041 pkts", "1041"),
            (set.total_rx_pkt, " Total-rx-pkt    :    1039 pkts", "1039"),
        ];
        for (id, line, value) in cases {
            assert_eq!(compile(&descs, id).feed(line).as_deref(), Some(value), "{line}");
        }
        let line = "  m_traffic_duration  |  4.98 sec  |  5.02 sec  | measured traffic duration";
        assert_eq!(
            compile(&descs, set.m_traff_dur_client).feed(line).as_deref(),
            Some("4.98")
        );
        assert_eq!(
            compile(&descs, set.m_traff_dur_server).feed(line).as_deref(),
            Some("5.02")
        );
    }

    #[test]
    fn port_filters_pick_their_column() {
        let (descs, set) = filter_set(&opts(Some(Iom::Normal)), 2);
        let ids = set.per_port.unwrap().ids;
        let line = "   opackets |          285858 |          285904 ";
        assert_eq!(compile(&descs, ids[0][0]).feed(line).as_deref(), Some("285858"));
        assert_eq!(compile(&descs, ids[1][0]).feed(line).as_deref(), Some("285904"));
        assert_eq!(compile(&descs, ids[0][1]).feed(line), None);
        // A row with the wrong number of columns is not a counter row.
        assert_eq!(compile(&descs, ids[0][0]).feed("   opackets |  1 "), None);
        let line = "current time    : 5.1 sec  ";
        assert_eq!(compile(&descs, ids[0][6]).feed(line).as_deref(), Some("5.1"));
        assert_eq!(compile(&descs, ids[1][6]).feed(line).as_deref(), Some("5.1"));
        let line = "test duration   : 54.9 sec  ";
        assert_eq!(compile(&descs, ids[1][7]).feed(line).as_deref(), Some("54.9"));
    }
}
