//! The statistics of a finished generator run.

use std::cmp::Reverse;

use delegate::delegate;
use ordered_float::OrderedFloat;

use crate::meas::{Aggregation, MeasKind, Measurement, MeasurementSink};
use crate::units::{parse_count, parse_secs, UnitError};

/// A per-port counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortParam {
    /// Packets sent.
    Opkts,
    /// Bytes sent.
    Obytes,
    /// Packets received.
    Ipkts,
    /// Bytes received.
    Ibytes,
    /// Receive errors.
    Ierrs,
    /// Transmit errors.
    Oerrs,
    /// Seconds since the generator started.
    CurrTime,
    /// Expected length of the test in seconds.
    TestDuration,
}

impl PortParam {
    /// Number of counters per port.
    pub const COUNT: usize = 8;

    /// Every counter, in the order the generator prints them.
    pub const ALL: [PortParam; Self::COUNT] = [
        PortParam::Opkts,
        PortParam::Obytes,
        PortParam::Ipkts,
        PortParam::Ibytes,
        PortParam::Ierrs,
        PortParam::Oerrs,
        PortParam::CurrTime,
        PortParam::TestDuration,
    ];

    /// The counter's label in the generator output.
    pub const fn name(self) -> &'static str {
        match self {
            PortParam::Opkts => "opackets",
            PortParam::Obytes => "obytes",
            PortParam::Ipkts => "ipackets",
            PortParam::Ibytes => "ibytes",
            PortParam::Ierrs => "ierrors",
            PortParam::Oerrs => "oerrors",
            PortParam::CurrTime => "current time",
            PortParam::TestDuration => "test duration",
        }
    }

    /// Returns `true` for the counters measured in seconds.
    pub const fn is_time(self) -> bool {
        matches!(self, PortParam::CurrTime | PortParam::TestDuration)
    }
}

/// One sample of the counters of one port.
#[derive(Debug, Default, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PortStat {
    pub opackets: u64,
    pub obytes: u64,
    pub ipackets: u64,
    pub ibytes: u64,
    pub ierrors: u64,
    pub oerrors: u64,
    pub curr_time: f64,
    pub test_duration: f64,
}

impl PortStat {
    /// Returns the value of `param`.
    pub fn get(&self, param: PortParam) -> f64 {
        match param {
            PortParam::Opkts => self.opackets as f64,
            PortParam::Obytes => self.obytes as f64,
            PortParam::Ipkts => self.ipackets as f64,
            PortParam::Ibytes => self.ibytes as f64,
            PortParam::Ierrs => self.ierrors as f64,
            PortParam::Oerrs => self.oerrors as f64,
            PortParam::CurrTime => self.curr_time,
            PortParam::TestDuration => self.test_duration,
        }
    }

    /// Parses the generator's rendering of `param` into the sample.
    pub(crate) fn set(&mut self, param: PortParam, raw: &str) -> Result<(), UnitError> {
        match param {
            PortParam::Opkts => self.opackets = parse_count(raw)?,
            PortParam::Obytes => self.obytes = parse_count(raw)?,
            PortParam::Ipkts => self.ipackets = parse_count(raw)?,
            PortParam::Ibytes => self.ibytes = parse_count(raw)?,
            PortParam::Ierrs => self.ierrors = parse_count(raw)?,
            PortParam::Oerrs => self.oerrors = parse_count(raw)?,
            PortParam::CurrTime => self.curr_time = parse_secs(raw)?,
            PortParam::TestDuration => self.test_duration = parse_secs(raw)?,
        }
        Ok(())
    }
}

/// The per-port time series: `samples[i][p]` is the `i`-th sample of port `p`.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PerPortStat {
    /// Number of ports in every sample.
    pub n_ports: usize,
    /// Samples in the order the generator printed them.
    pub samples: Vec<Vec<PortStat>>,
}

impl PerPortStat {
    delegate! {
        to self.samples {
            /// Number of samples.
            pub fn len(&self) -> usize;
            /// Returns `true` if there are no samples.
            pub fn is_empty(&self) -> bool;
            /// Iterates over the samples.
            pub fn iter(&self) -> std::slice::Iter<'_, Vec<PortStat>>;
        }
    }
}

/// Statistics of a generator run.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Report {
    /// Average transmit throughput, bits per second.
    pub avg_tx: f64,
    /// Average receive throughput, bits per second.
    pub avg_rx: f64,
    /// Average connection rate.
    pub avg_cps: f64,
    /// Packets sent.
    pub total_tx_pkts: u64,
    /// Packets received.
    pub total_rx_pkts: u64,
    /// Traffic duration measured by the client side, seconds.
    pub m_traff_dur_client: f64,
    /// Traffic duration measured by the server side, seconds.
    pub m_traff_dur_server: f64,
    /// Per-port counters; empty unless the generator ran in the normal IO mode.
    pub per_port_stat: PerPortStat,
}

impl Report {
    /// Returns the series of `param` at `port`, one value per sample.
    ///
    /// With `absolute` set the raw counter values are returned. Otherwise value `i` is the
    /// difference to sample `i - 1` (sample `-1` being zero), divided by the elapsed time
    /// when `by_time` is set. The first sample is divided by its own timestamp, and a zero
    /// time difference yields `NaN`.
    pub fn param_series(
        &self,
        param: PortParam,
        port: usize,
        absolute: bool,
        by_time: bool,
    ) -> Result<Vec<f64>, ReportError> {
        let stat = &self.per_port_stat;
        if stat.n_ports == 0 {
            return Err(ReportError::NoPerPortStats);
        }
        if port >= stat.n_ports {
            return Err(ReportError::NoSuchPort {
                port,
                n_ports: stat.n_ports,
            });
        }
        let values = stat
            .iter()
            .map(|sample| sample[port].get(param))
            .collect::<Vec<_>>();
        if absolute {
            return Ok(values);
        }
        let mut prev = PortStat::default();
        let series = stat
            .iter()
            .map(|sample| {
                let cur = sample[port];
                let mut v = cur.get(param) - prev.get(param);
                if by_time {
                    let dt = cur.curr_time - prev.curr_time;
                    v = if dt == 0.0 { f64::NAN } else { v / dt };
                }
                prev = cur;
                v
            })
            .collect();
        Ok(series)
    }

    /// Returns the median rate of `param` at `port` over the samples taken in
    /// `[t_start, t_end)`.
    ///
    /// The rate of sample `k` covers the interval from the previous sample to sample `k`; it
    /// is in the window when that interval starts in the window. `NaN` rates are skipped.
    /// The median is the middle element of the rates sorted in descending order.
    ///
    /// Each bound must lie strictly between two recorded times. Otherwise the window is
    /// extended to the first or last sample and [`ReportError::WindowOutOfRange`] is returned
    /// with the median of the extended window.
    pub fn median(
        &self,
        param: PortParam,
        port: usize,
        t_start: f64,
        t_end: f64,
    ) -> Result<f64, ReportError> {
        let times = self.param_series(PortParam::CurrTime, port, true, false)?;
        let rates = self.param_series(param, port, false, true)?;
        let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
            return Err(ReportError::EmptyWindow);
        };
        let starts = |k: usize| if k == 0 { 0.0 } else { times[k - 1] };
        let n = times.len();

        let bracketed = |t: f64| times.windows(2).any(|w| w[0] < t && t < w[1]);
        let start_found = bracketed(t_start);
        let end_found = bracketed(t_end);
        let lo = if start_found {
            (0..n).find(|&k| starts(k) >= t_start).unwrap_or(n)
        } else {
            log::warn!("window start {t_start} is not inside ({first}, {last}), using first sample");
            0
        };
        let hi = if end_found {
            (0..n).rev().find(|&k| starts(k) < t_end).map_or(0, |k| k + 1)
        } else {
            log::warn!("window end {t_end} is not inside ({first}, {last}), using last sample");
            n
        };

        let mut window = rates[lo..hi.max(lo)]
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect::<Vec<_>>();
        if window.is_empty() {
            return Err(ReportError::EmptyWindow);
        }
        window.sort_by_key(|&v| Reverse(OrderedFloat(v)));
        let median = window[window.len() / 2];
        if start_found && end_found {
            Ok(median)
        } else {
            Err(ReportError::WindowOutOfRange { fallback: median })
        }
    }

    /// Forwards the average throughput and connection rate to `sink`.
    pub fn log_measurements(&self, sink: &mut dyn MeasurementSink) {
        let single =
            |kind, name: &str, value| Measurement::new(kind, name, Aggregation::Single, value, 1.0);
        sink.add(single(MeasKind::Throughput, "Average Tx", self.avg_tx));
        sink.add(single(MeasKind::Throughput, "Average Rx", self.avg_rx));
        sink.add(single(MeasKind::ConnectionRate, "Average CPS", self.avg_cps));
    }
}

/// Error assembling or querying a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Filters disagree on the number of samples.
    #[error("filter {name:?} produced {got} samples, expected {expected}")]
    SampleCountMismatch {
        /// The filter.
        name: String,
        /// Samples of the first per-port filter.
        expected: usize,
        /// Samples of this filter.
        got: usize,
    },

    /// A filter's end-of-stream marker is missing, repeated, or not last.
    #[error("filter {0:?} did not end with a single end-of-stream marker")]
    BadEos(String),

    /// A filter produced the wrong number of values for a scalar.
    #[error("filter {name:?} produced {got} values, expected one")]
    NotScalar {
        /// The filter.
        name: String,
        /// Values received.
        got: usize,
    },

    /// A value could not be parsed.
    #[error("filter {name:?} produced a malformed value")]
    Malformed {
        /// The filter.
        name: String,
        /// The parse error.
        #[source]
        source: UnitError,
    },

    /// Per-port statistics were not collected.
    #[error("no per-port statistics were collected")]
    NoPerPortStats,

    /// The port index is too large.
    #[error("no port {port} (there are {n_ports})")]
    NoSuchPort {
        /// Requested port.
        port: usize,
        /// Number of ports.
        n_ports: usize,
    },

    /// The window holds no usable sample.
    #[error("no samples in the requested window")]
    EmptyWindow,

    /// A window bound is outside the recorded times.
    #[error("window is outside the recorded samples (fallback median {fallback})")]
    WindowOutOfRange {
        /// Median over the window extended to the recorded samples.
        fallback: f64,
    },
}
