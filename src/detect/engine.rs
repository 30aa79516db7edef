use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::config::{FeatureConfig, RanConfig};
use crate::detect::cause::{BaselineProvider, CauseEngine};
use crate::detect::scorer::Scorer;
use crate::detect::{AnomalyLabel, DetectError, Verdict};
use crate::storage::TelemetryStore;
use crate::telemetry::Sample;

/// Scorer followed by root-cause attribution.
#[derive(Debug)]
pub struct AnomalyEngine {
    scorer: Scorer,
    causes: CauseEngine,
}

/// Verdicts for one batch, aligned with the input.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub verdicts: Vec<Verdict>,
    /// Rows the scorer could not score; their verdict is `Normal`.
    pub malformed: usize,
    /// Indices of rows the scorer flagged, including ones later demoted.
    pub scorer_flagged: Vec<usize>,
}

impl AnomalyEngine {
    pub fn new(scorer: Scorer, causes: CauseEngine) -> Self {
        Self { scorer, causes }
    }

    pub fn causes(&self) -> &CauseEngine {
        &self.causes
    }

    pub fn classify(&self, batch: &[Sample], provider: &dyn BaselineProvider) -> BatchOutcome {
        let mut malformed = 0;
        let labels: Vec<AnomalyLabel> = self
            .scorer
            .predict(batch)
            .into_iter()
            .map(|label| {
                label.unwrap_or_else(|_| {
                    malformed += 1;
                    AnomalyLabel::Normal
                })
            })
            .collect();

        BatchOutcome {
            verdicts: self.causes.classify_causes(batch, &labels, provider),
            malformed,
            scorer_flagged: labels
                .iter()
                .enumerate()
                .filter(|(_, label)| label.is_anomalous())
                .map(|(i, _)| i)
                .collect(),
        }
    }
}

/// One classified row, as reported by a detection cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedRow {
    pub ue_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: AnomalyLabel,
    pub degradation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub scanned: usize,
    pub flagged: usize,
    pub malformed: usize,
    /// Stored reports that failed validation.
    pub rejected: usize,
    pub written: usize,
    pub rows: Vec<ClassifiedRow>,
}

/// Store-driven detection: read fresh reports, classify, write anomalies back.
pub struct DetectionCycle {
    engine: AnomalyEngine,
    store: TelemetryStore,
    features: FeatureConfig,
    measurement: String,
    anomaly_measurement: String,
    batch_window: Duration,
    batch_limit: usize,
    cursor: AtomicI64,
}

impl DetectionCycle {
    /// Build from configuration. Fails with `ArtifactMissing` if the model
    /// cannot be loaded.
    pub fn from_config(cfg: &RanConfig, store: TelemetryStore) -> Result<Self, DetectError> {
        let scorer = Scorer::load(&cfg.model.dir)?
            .with_span(info_span!("scorer", model = %cfg.model.dir.display()));
        let causes = CauseEngine::new(
            cfg.features.clone(),
            cfg.store.measurement.clone(),
            cfg.detection.throughput_threshold_pct,
        )
        .with_lookback(Duration::hours(cfg.detection.lookback_hours))
        .with_span(info_span!("root_cause", measurement = %cfg.store.measurement));

        Ok(Self {
            engine: AnomalyEngine::new(scorer, causes),
            store,
            features: cfg.features.clone(),
            measurement: cfg.store.measurement.clone(),
            anomaly_measurement: cfg.store.anomaly_measurement.clone(),
            batch_window: Duration::seconds(cfg.detection.batch_window_secs),
            batch_limit: cfg.detection.batch_limit,
            cursor: AtomicI64::new(0),
        })
    }

    pub fn engine(&self) -> &AnomalyEngine {
        &self.engine
    }

    /// Run one cycle over reports not seen by a previous cycle.
    pub fn run_once(&self) -> Result<CycleReport> {
        let since = Utc::now() - self.batch_window;
        let fetched = self.store.fetch_batch(
            &self.measurement,
            self.cursor.load(Ordering::Acquire),
            since,
            self.batch_limit,
            &self.features,
        )?;

        let outcome = self.engine.classify(&fetched.samples, &self.store);
        let flagged_ids: Vec<i64> = outcome
            .scorer_flagged
            .iter()
            .filter_map(|&i| fetched.ids.get(i).copied())
            .collect();
        self.store.mark_scorer_flagged(&flagged_ids)?;

        let pairs: Vec<(&Sample, &Verdict)> =
            fetched.samples.iter().zip(&outcome.verdicts).collect();
        let written = self.store.record_anomalies(
            &self.anomaly_measurement,
            &self.measurement,
            &pairs,
            &self.features,
        )?;

        if let Some(last_id) = fetched.last_id {
            self.cursor.store(last_id, Ordering::Release);
        }

        let report = CycleReport {
            scanned: fetched.samples.len(),
            flagged: outcome.verdicts.iter().filter(|v| v.label.is_anomalous()).count(),
            malformed: outcome.malformed,
            rejected: fetched.rejected,
            written,
            rows: pairs
                .iter()
                .map(|(sample, verdict)| ClassifiedRow {
                    ue_id: sample.ue_id.clone(),
                    timestamp: sample.timestamp,
                    label: verdict.label,
                    degradation: verdict.cause.to_field(),
                })
                .collect(),
        };

        if report.malformed > 0 || report.rejected > 0 {
            warn!(
                malformed = report.malformed,
                rejected = report.rejected,
                "cycle skipped unusable reports"
            );
        }
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                flagged = report.flagged,
                written = report.written,
                "detection cycle complete"
            );
        }
        Ok(report)
    }
}
