//! Assembly of a [`Report`] from the filters of a finished run.

use std::time::Duration;

use crate::filters::{FilterSet, PerPortFilters};
use crate::job::{FilterId, Job, Message};
use crate::report::{PerPortStat, PortParam, PortStat, Report, ReportError};
use crate::units::{parse_count, parse_prefixed, parse_secs, UnitError};
use crate::Error;

/// Drains every filter of `job` and assembles the report.
///
/// Assembly is best-effort: a value that cannot be read is left at zero, the remaining
/// values are still assembled, and the report is returned inside
/// [`Error::PartialReport`].
pub(crate) fn assemble(
    job: &dyn Job,
    filters: &FilterSet,
    timeout: Duration,
) -> Result<Report, Error> {
    let a = Assembler { job, timeout };
    let mut problems = Vec::new();
    let report = Report {
        avg_tx: keep(a.average(filters.total_tx, "total_tx"), &mut problems),
        avg_rx: keep(a.average(filters.total_rx, "total_rx"), &mut problems),
        avg_cps: keep(a.average(filters.total_cps, "total_cps"), &mut problems),
        total_tx_pkts: keep(
            a.scalar(filters.total_tx_pkt, "total_tx_pkt", parse_count),
            &mut problems,
        ),
        total_rx_pkts: keep(
            a.scalar(filters.total_rx_pkt, "total_rx_pkt", parse_count),
            &mut problems,
        ),
        m_traff_dur_client: keep(
            a.scalar(filters.m_traff_dur_client, "m_traff_dur_client", parse_secs),
            &mut problems,
        ),
        m_traff_dur_server: keep(
            a.scalar(filters.m_traff_dur_server, "m_traff_dur_server", parse_secs),
            &mut problems,
        ),
        per_port_stat: match &filters.per_port {
            Some(per_port) => keep(a.per_port(per_port), &mut problems),
            None => PerPortStat::default(),
        },
    };
    match problems.into_iter().next() {
        None => Ok(report),
        Some(source) => Err(Error::PartialReport {
            report: Box::new(report),
            source: Box::new(source),
        }),
    }
}

fn keep<T: Default>(res: Result<T, Error>, problems: &mut Vec<Error>) -> T {
    res.unwrap_or_else(|e| {
        log::error!("{e}");
        problems.push(e);
        T::default()
    })
}

struct Assembler<'a> {
    job: &'a dyn Job,
    timeout: Duration,
}

impl Assembler<'_> {
    /// Receives one run's worth of messages from a filter.
    fn drain(&self, id: FilterId, name: &str) -> Result<Vec<String>, Error> {
        let messages = self.job.receive_many(id, self.timeout)?;
        let eos_count = messages.iter().filter(|m| **m == Message::Eos).count();
        // CORRECTNESS: the end-of-stream marker appears exactly once, as the last message.
        if eos_count != 1 || messages.last() != Some(&Message::Eos) {
            return Err(ReportError::BadEos(name.to_owned()).into());
        }
        Ok(messages
            .into_iter()
            .filter_map(|m| match m {
                Message::Data(data) => Some(data),
                Message::Eos => None,
            })
            .collect())
    }

    fn average(&self, id: FilterId, name: &str) -> Result<f64, Error> {
        let values = self.drain(id, name)?;
        if values.len() < 2 {
            log::warn!(
                "{name}: too few samples ({}) to compute an average",
                values.len()
            );
            return Ok(0.0);
        }
        let total = values
            .iter()
            .map(|v| parse_prefixed(v).map_err(|source| malformed(name, source)))
            .sum::<Result<f64, _>>()?;
        Ok(total / values.len() as f64)
    }

    fn scalar<T>(
        &self,
        id: FilterId,
        name: &str,
        parse: fn(&str) -> Result<T, UnitError>,
    ) -> Result<T, Error> {
        let values = self.drain(id, name)?;
        match values.as_slice() {
            [value] => Ok(parse(value).map_err(|source| malformed(name, source))?),
            _ => Err(ReportError::NotScalar {
                name: name.to_owned(),
                got: values.len(),
            }
            .into()),
        }
    }

    /// Reconstructs the per-port time series.
    ///
    /// Samples are matched across filters by position, so every filter must have produced
    /// the same number of values. All filters are drained even if one of them fails.
    fn per_port(&self, filters: &PerPortFilters) -> Result<PerPortStat, Error> {
        let n_ports = filters.n_ports();
        let columns = filters
            .ids
            .iter()
            .enumerate()
            .flat_map(|(port, ids)| {
                PortParam::ALL.into_iter().zip(ids).map(move |(param, &id)| {
                    let name = format!("port {port} {}", param.name());
                    (port, param, name, id)
                })
            })
            .map(|(port, param, name, id)| {
                let column = self.drain(id, &name);
                (port, param, name, column)
            })
            .collect::<Vec<_>>();

        let mut n_samples = None;
        let mut samples = Vec::new();
        for (port, param, name, column) in columns {
            let column = column?;
            let expected = *n_samples.get_or_insert(column.len());
            // CORRECTNESS: every filter yields the same number of samples.
            if column.len() != expected {
                return Err(ReportError::SampleCountMismatch {
                    name,
                    expected,
                    got: column.len(),
                }
                .into());
            }
            if samples.is_empty() {
                samples = vec![vec![PortStat::default(); n_ports]; expected];
            }
            for (sample, raw) in samples.iter_mut().zip(&column) {
                sample[port]
                    .set(param, raw)
                    .map_err(|source| malformed(&name, source))?;
            }
        }

        for port in 0..n_ports {
            if samples
                .windows(2)
                .any(|w| w[1][port].curr_time < w[0][port].curr_time)
            {
                log::warn!("port {port}: current time decreases between samples");
            }
        }
        Ok(PerPortStat { n_ports, samples })
    }
}

fn malformed(name: &str, source: UnitError) -> Error {
    ReportError::Malformed {
        name: name.to_owned(),
        source,
    }
    .into()
}
