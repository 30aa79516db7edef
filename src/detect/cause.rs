//! Rule-based root-cause attribution for anomalous samples.
//!
//! Each anomalous sample in the scanned prefix of a batch is compared with
//! the per-metric maxima of its UE's normal history. Every monitored metric
//! that falls below its cutoff joins the degradation cause, and the cause
//! decides the final label.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info_span, warn, Span};

use crate::analysis::stats::Baseline;
use crate::config::FeatureConfig;
use crate::detect::{AnomalyLabel, DegradationCause, DetectError, RetrievalError, Verdict};
use crate::telemetry::{KpiReading, Metric, Sample};

/// Only this many leading rows of a batch are examined.
pub const SCAN_LIMIT: usize = 10;
/// Default baseline history window.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 240;
/// Allowed RSRP drop below the baseline maximum (dB).
pub const RSRP_OFFSET: f64 = 15.0;
/// Allowed RSRQ drop below the baseline maximum (dB).
pub const RSRQ_OFFSET: f64 = 10.0;

/// Historical readings request for one UE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineQuery {
    pub ue_id: String,
    pub measurement: String,
    pub lookback: Duration,
    /// Columns to return, in this order.
    pub metrics: Vec<String>,
    /// Measurement times of this UE's reports flagged in the current batch.
    /// They are not normal history and must be left out.
    pub exclude: Vec<DateTime<Utc>>,
}

/// Tabular answer to a [`BaselineQuery`]; `None` marks a missing value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<f64>>>,
}

/// Source of historical normal-period readings.
pub trait BaselineProvider {
    fn query(&self, query: &BaselineQuery) -> Result<BaselineRows, RetrievalError>;
}

/// One degradation check: `metric` is degraded iff
/// `comparator(sample value, cutoff(baseline max, threshold pct))`.
pub struct DegradationRule {
    pub metric: Metric,
    pub comparator: fn(f64, f64) -> bool,
    pub cutoff: fn(f64, f64) -> f64,
}

fn below(value: f64, cutoff: f64) -> bool {
    value < cutoff
}

fn throughput_cutoff(max: f64, threshold_pct: f64) -> f64 {
    max * (100.0 - threshold_pct) / 100.0
}

fn rsrp_cutoff(max: f64, _threshold_pct: f64) -> f64 {
    max - RSRP_OFFSET
}

fn rsrq_cutoff(max: f64, _threshold_pct: f64) -> f64 {
    max - RSRQ_OFFSET
}

/// Evaluated in this order.
pub const RULES: [DegradationRule; 3] = [
    DegradationRule {
        metric: Metric::Throughput,
        comparator: below,
        cutoff: throughput_cutoff,
    },
    DegradationRule {
        metric: Metric::Rsrp,
        comparator: below,
        cutoff: rsrp_cutoff,
    },
    DegradationRule {
        metric: Metric::Rsrq,
        comparator: below,
        cutoff: rsrq_cutoff,
    },
];

/// Metrics of `kpi` degraded relative to `baseline`.
pub fn find_degradation(kpi: &KpiReading, baseline: &Baseline, threshold_pct: f64) -> DegradationCause {
    RULES
        .iter()
        .filter(|rule| {
            let cutoff = (rule.cutoff)(baseline.max_of(rule.metric), threshold_pct);
            (rule.comparator)(kpi.get(rule.metric), cutoff)
        })
        .map(|rule| rule.metric)
        .collect()
}

/// Label implied by a cause set.
pub fn label_for(cause: &DegradationCause) -> AnomalyLabel {
    if cause.is_empty() {
        AnomalyLabel::Normal
    } else if cause.contains(Metric::Throughput)
        && (cause.contains(Metric::Rsrp) || cause.contains(Metric::Rsrq))
    {
        AnomalyLabel::DualDegradation
    } else {
        AnomalyLabel::SingleDegradation
    }
}

/// Re-labels scorer-flagged samples with a degradation cause.
#[derive(Debug)]
pub struct CauseEngine {
    features: FeatureConfig,
    measurement: String,
    lookback: Duration,
    throughput_threshold_pct: f64,
    span: Span,
}

impl CauseEngine {
    pub fn new(
        features: FeatureConfig,
        measurement: impl Into<String>,
        throughput_threshold_pct: f64,
    ) -> Self {
        Self {
            features,
            measurement: measurement.into(),
            lookback: Duration::hours(DEFAULT_LOOKBACK_HOURS),
            throughput_threshold_pct,
            span: info_span!("root_cause"),
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Emit this engine's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Final verdict per row of `batch`, in order.
    ///
    /// Only anomalous rows among the first [`SCAN_LIMIT`] physical rows are
    /// examined; everything else passes through with its scorer label and an
    /// empty cause. A missing `labels` entry counts as normal. An anomalous
    /// row whose baseline cannot be obtained is demoted to `Normal`. Every
    /// flagged row of the batch is kept out of its UE's baseline.
    pub fn classify_causes(
        &self,
        batch: &[Sample],
        labels: &[AnomalyLabel],
        provider: &dyn BaselineProvider,
    ) -> Vec<Verdict> {
        let _guard = self.span.enter();

        let label_at = |i: usize| labels.get(i).copied().unwrap_or_default();
        let mut flagged: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
        for (i, sample) in batch.iter().enumerate() {
            if label_at(i).is_anomalous() {
                flagged.entry(sample.ue_id.as_str()).or_default().push(sample.timestamp);
            }
        }

        batch
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let label = label_at(i);
                if i >= SCAN_LIMIT || !label.is_anomalous() {
                    return Verdict::unexplained(label);
                }
                let exclude = flagged
                    .get(sample.ue_id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                match self.explain(sample, exclude, provider) {
                    Ok(verdict) => {
                        debug!(
                            row = i,
                            ue = %sample.ue_id,
                            label = %verdict.label,
                            cause = %verdict.cause,
                            "attributed anomaly"
                        );
                        verdict
                    }
                    Err(e) => {
                        warn!(row = i, ue = %sample.ue_id, error = %e, "no baseline, demoting to normal");
                        Verdict::normal()
                    }
                }
            })
            .collect()
    }

    fn explain(
        &self,
        sample: &Sample,
        exclude: &[DateTime<Utc>],
        provider: &dyn BaselineProvider,
    ) -> Result<Verdict, DetectError> {
        let baseline = self
            .baseline_excluding(&sample.ue_id, exclude, provider)?
            .ok_or_else(|| RetrievalError::Query(format!("no usable history for UE {}", sample.ue_id)))?;

        let cause = find_degradation(&sample.kpi, &baseline, self.throughput_threshold_pct);
        Ok(Verdict {
            label: label_for(&cause),
            cause,
        })
    }

    /// Baseline over the lookback window, built only from complete rows.
    pub fn baseline_for(
        &self,
        ue_id: &str,
        provider: &dyn BaselineProvider,
    ) -> Result<Option<Baseline>, RetrievalError> {
        self.baseline_excluding(ue_id, &[], provider)
    }

    /// Like [`CauseEngine::baseline_for`], leaving out reports measured at `exclude`.
    pub fn baseline_excluding(
        &self,
        ue_id: &str,
        exclude: &[DateTime<Utc>],
        provider: &dyn BaselineProvider,
    ) -> Result<Option<Baseline>, RetrievalError> {
        let query = BaselineQuery {
            ue_id: ue_id.to_string(),
            measurement: self.measurement.clone(),
            lookback: self.lookback,
            metrics: Metric::MONITORED
                .iter()
                .map(|m| m.column(&self.features).to_string())
                .collect(),
            exclude: exclude.to_vec(),
        };
        let response = provider.query(&query)?;

        let mut positions = [0usize; 3];
        for (slot, column) in positions.iter_mut().zip(&query.metrics) {
            *slot = response
                .columns
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| RetrievalError::Malformed(format!("response lacks column '{column}'")))?;
        }

        let readings: Vec<KpiReading> = response
            .rows
            .iter()
            .filter_map(|row| {
                let value = |pos: usize| row.get(pos).copied().flatten().filter(|v| !v.is_nan());
                Some(KpiReading {
                    throughput: value(positions[0])?,
                    rsrp: value(positions[1])?,
                    rsrq: value(positions[2])?,
                })
            })
            .collect();

        debug!(
            ue = ue_id,
            rows = response.rows.len(),
            usable = readings.len(),
            "fetched baseline history"
        );
        Ok(Baseline::from_readings(&readings))
    }
}
