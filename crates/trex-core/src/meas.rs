//! Measurement logging.
//!
//! Measurements of a run are collected by a [`MeasurementSink`]. [`MiLog`] groups them by
//! kind into a single JSON document and logs it under the `mi` target, where test harnesses
//! pick up machine-readable results.

/// What a measurement measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasKind {
    /// Bits per second.
    Throughput,
    /// Connections per second.
    ConnectionRate,
}

/// How a measured value was aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// A single value.
    Single,
    /// Arithmetic mean.
    Mean,
    /// Median.
    Median,
}

/// A named measured value.
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct Measurement {
    /// The quantity measured.
    pub kind: MeasKind,
    /// Human-readable name.
    #[new(into)]
    pub name: String,
    /// Aggregation of `value`.
    pub aggr: Aggregation,
    /// The value, in units of `multiplier`.
    pub value: f64,
    /// Scale of `value`.
    pub multiplier: f64,
}

/// Receives measurements.
pub trait MeasurementSink {
    /// Records a measurement.
    fn add(&mut self, meas: Measurement);
}

impl MeasurementSink for Vec<Measurement> {
    fn add(&mut self, meas: Measurement) {
        self.push(meas);
    }
}

/// Collects measurements of a tool and logs them as one JSON document.
#[derive(Debug, Clone)]
pub struct MiLog {
    tool: String,
    measurements: Vec<Measurement>,
}

#[derive(serde::Serialize)]
struct MiDocument<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    version: u32,
    tool: &'a str,
    results: Vec<MiResult>,
}

#[derive(serde::Serialize)]
struct MiResult {
    #[serde(rename = "type")]
    kind: MeasKind,
    entries: Vec<MiEntry>,
}

#[derive(serde::Serialize)]
struct MiEntry {
    aggr: Aggregation,
    value: f64,
    multiplier: f64,
    name: String,
}

impl MiLog {
    /// Creates an empty log for `tool`.
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            measurements: Vec::new(),
        }
    }

    /// Renders the collected measurements, grouped by kind in order of first appearance.
    pub fn to_json(&self) -> String {
        let mut results: Vec<MiResult> = Vec::new();
        for m in &self.measurements {
            let entry = MiEntry {
                aggr: m.aggr,
                value: m.value,
                multiplier: m.multiplier,
                name: m.name.clone(),
            };
            match results.iter_mut().find(|r| r.kind == m.kind) {
                Some(result) => result.entries.push(entry),
                None => results.push(MiResult {
                    kind: m.kind,
                    entries: vec![entry],
                }),
            }
        }
        let doc = MiDocument {
            kind: "measurement",
            version: 1,
            tool: &self.tool,
            results,
        };
        // Serializing plain structs of strings and numbers cannot fail.
        serde_json::to_string(&doc).unwrap_or_default()
    }

    /// Logs the collected measurements.
    pub fn flush(self) {
        log::info!(target: "mi", "{}", self.to_json());
    }
}

impl MeasurementSink for MiLog {
    fn add(&mut self, meas: Measurement) {
        self.measurements.push(meas);
    }
}
