//! UE measurement records.
//!
//! Reports arrive as loosely-typed JSON objects (one per UE per timestamp).
//! [`Sample::from_record`] is the single ingestion boundary: it resolves the
//! configured column names, insists on numeric values for the monitored KPIs
//! and rejects anything ambiguous instead of coercing it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::FeatureConfig;
use crate::detect::DetectError;

/// Metrics the root-cause rules monitor for degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    Throughput,
    Rsrp,
    Rsrq,
}

impl Metric {
    /// Rule evaluation order.
    pub const MONITORED: [Metric; 3] = [Metric::Throughput, Metric::Rsrp, Metric::Rsrq];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Throughput => "Throughput",
            Metric::Rsrp => "RSRP",
            Metric::Rsrq => "RSRQ",
        }
    }

    /// Column carrying this metric in UE reports.
    pub fn column<'a>(&self, features: &'a FeatureConfig) -> &'a str {
        match self {
            Metric::Throughput => &features.thpt,
            Metric::Rsrp => &features.rsrp,
            Metric::Rsrq => &features.rsrq,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The monitored KPIs of one report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiReading {
    pub throughput: f64,
    pub rsrp: f64,
    pub rsrq: f64,
}

impl KpiReading {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Throughput => self.throughput,
            Metric::Rsrp => self.rsrp,
            Metric::Rsrq => self.rsrq,
        }
    }
}

/// One validated measurement report for one UE at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub ue_id: String,
    pub timestamp: DateTime<Utc>,
    pub kpi: KpiReading,
    /// Every numeric field of the report, keyed by column name.
    pub metrics: BTreeMap<String, f64>,
}

impl Sample {
    /// Validate a raw report.
    ///
    /// Non-numeric fields other than the UE id and timestamp are ignored;
    /// `null` fields count as absent.
    pub fn from_record(record: &Value, features: &FeatureConfig) -> Result<Self, DetectError> {
        let fields = record
            .as_object()
            .ok_or_else(|| malformed("record is not a JSON object"))?;

        let ue_id = match fields.get(&features.ue) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            Some(other) => {
                return Err(malformed(format!(
                    "field '{}' is not a usable UE id: {other}",
                    features.ue
                )))
            }
            None => return Err(malformed(format!("missing field '{}'", features.ue))),
        };

        let timestamp = match fields.get(&features.timestamp) {
            Some(value) => parse_timestamp(value).ok_or_else(|| {
                malformed(format!(
                    "field '{}' is not a timestamp: {value}",
                    features.timestamp
                ))
            })?,
            None => return Err(malformed(format!("missing field '{}'", features.timestamp))),
        };

        let mut metrics = BTreeMap::new();
        for (name, value) in fields {
            if name == &features.ue || name == &features.timestamp {
                continue;
            }
            if let Some(v) = value.as_f64() {
                metrics.insert(name.clone(), v);
            }
        }

        let kpi = KpiReading {
            throughput: required(fields, &metrics, Metric::Throughput.column(features))?,
            rsrp: required(fields, &metrics, Metric::Rsrp.column(features))?,
            rsrq: required(fields, &metrics, Metric::Rsrq.column(features))?,
        };

        Ok(Self {
            ue_id,
            timestamp,
            kpi,
            metrics,
        })
    }

    /// Numeric field by column name.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Render back to the raw report shape accepted by [`Sample::from_record`].
    pub fn to_record(&self, features: &FeatureConfig) -> Value {
        let mut fields = Map::new();
        fields.insert(features.ue.clone(), Value::String(self.ue_id.clone()));
        fields.insert(
            features.timestamp.clone(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        for (name, value) in &self.metrics {
            fields.insert(name.clone(), Value::from(*value));
        }
        Value::Object(fields)
    }
}

/// Canonical timestamp rendering; lexicographic order matches time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC 3339 strings or integer epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

fn required(
    fields: &Map<String, Value>,
    metrics: &BTreeMap<String, f64>,
    column: &str,
) -> Result<f64, DetectError> {
    if let Some(v) = metrics.get(column) {
        return Ok(*v);
    }
    match fields.get(column) {
        None | Some(Value::Null) => Err(malformed(format!("missing field '{column}'"))),
        Some(other) => Err(malformed(format!("field '{column}' is not numeric: {other}"))),
    }
}

fn malformed(reason: impl Into<String>) -> DetectError {
    DetectError::MalformedSample(reason.into())
}
