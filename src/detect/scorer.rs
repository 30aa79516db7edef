use std::path::Path;

use tracing::{debug, error, info_span, warn, Span};

use crate::analysis::model::{ModelArtifact, OUTLIER};
use crate::detect::{AnomalyLabel, DetectError};
use crate::telemetry::Sample;

/// Labels samples normal/anomalous with the pre-trained outlier model.
///
/// A `Scorer` only exists with a complete [`ModelArtifact`]; a failed load
/// surfaces as `ArtifactMissing` from [`Scorer::load`] instead.
#[derive(Debug)]
pub struct Scorer {
    artifact: ModelArtifact,
    span: Span,
}

/// Per-row scorer outcome. `Err` is always `MalformedSample` for that row.
pub type RowLabel = Result<AnomalyLabel, DetectError>;

impl Scorer {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self {
            artifact,
            span: info_span!("scorer"),
        }
    }

    pub fn load(dir: &Path) -> Result<Self, DetectError> {
        ModelArtifact::load(dir).map(Self::new)
    }

    /// Emit this scorer's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// One label per input row, in input order.
    ///
    /// Rows missing a model feature get `MalformedSample`; the rest of the
    /// batch is still scored. Anomalous rows are labelled
    /// `SingleDegradation` (1) until the root-cause pass refines them.
    pub fn predict(&self, batch: &[Sample]) -> Vec<RowLabel> {
        let _guard = self.span.enter();
        let features = self.artifact.features();

        let mut out: Vec<RowLabel> = Vec::with_capacity(batch.len());
        let mut scored_rows = Vec::new();
        let mut matrix = Vec::new();

        for (i, sample) in batch.iter().enumerate() {
            match select_features(sample, features) {
                Ok(row) => {
                    scored_rows.push(i);
                    matrix.push(row);
                    out.push(Ok(AnomalyLabel::Normal));
                }
                Err(e) => {
                    warn!(row = i, ue = %sample.ue_id, error = %e, "skipping row");
                    out.push(Err(e));
                }
            }
        }

        if matrix.is_empty() {
            return out;
        }

        let scaled = self.artifact.scaler().transform(&matrix);
        let raw = self.artifact.classifier().predict(&scaled);
        if raw.len() != scored_rows.len() {
            error!(
                expected = scored_rows.len(),
                got = raw.len(),
                "classifier returned wrong number of labels"
            );
        }

        for (pos, &row) in scored_rows.iter().enumerate() {
            out[row] = match raw.get(pos) {
                Some(&OUTLIER) => Ok(AnomalyLabel::SingleDegradation),
                Some(_) => Ok(AnomalyLabel::Normal),
                None => Err(DetectError::artifact(
                    "classifier",
                    format!("no prediction for row {row}"),
                )),
            };
        }

        debug!(
            rows = batch.len(),
            scored = scored_rows.len(),
            flagged = out.iter().filter(|l| matches!(l, Ok(l) if l.is_anomalous())).count(),
            "scored batch"
        );
        out
    }
}

fn select_features(sample: &Sample, features: &[String]) -> Result<Vec<f64>, DetectError> {
    features
        .iter()
        .map(|name| {
            sample.metric(name).ok_or_else(|| {
                DetectError::MalformedSample(format!(
                    "UE {} at {} lacks feature '{name}'",
                    sample.ue_id, sample.timestamp
                ))
            })
        })
        .collect()
}
