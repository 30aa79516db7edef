//! Anomaly scoring and root-cause attribution.

pub mod cause;
pub mod engine;
pub mod scorer;

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::Metric;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("model artifact unavailable ({component}): {reason}")]
    ArtifactMissing {
        component: &'static str,
        reason: String,
    },
    #[error("malformed sample: {0}")]
    MalformedSample(String),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

impl DetectError {
    pub(crate) fn artifact(component: &'static str, reason: impl Into<String>) -> Self {
        DetectError::ArtifactMissing {
            component,
            reason: reason.into(),
        }
    }
}

/// Failure to obtain baseline history for a UE.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("telemetry store unavailable: {0}")]
    Unavailable(String),
    #[error("baseline query timed out after {0:?}")]
    Timeout(Duration),
    #[error("baseline query failed: {0}")]
    Query(String),
    #[error("malformed baseline response: {0}")]
    Malformed(String),
}

/// Final classification of one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AnomalyLabel {
    #[default]
    Normal = 0,
    SingleDegradation = 1,
    DualDegradation = 2,
}

impl AnomalyLabel {
    pub fn is_anomalous(self) -> bool {
        self != AnomalyLabel::Normal
    }
}

impl From<AnomalyLabel> for u8 {
    fn from(label: AnomalyLabel) -> u8 {
        label as u8
    }
}

impl TryFrom<u8> for AnomalyLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AnomalyLabel::Normal),
            1 => Ok(AnomalyLabel::SingleDegradation),
            2 => Ok(AnomalyLabel::DualDegradation),
            other => Err(format!("invalid anomaly label {other}")),
        }
    }
}

impl fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// The set of metrics found degraded for a sample. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationCause(BTreeSet<Metric>);

impl DegradationCause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: Metric) {
        self.0.insert(metric);
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.0.contains(&metric)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Metric> + '_ {
        self.0.iter().copied()
    }

    /// Persisted form: space-separated metric names, `None` when empty.
    pub fn to_field(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

impl FromIterator<Metric> for DegradationCause {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for DegradationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, metric) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(metric.label())?;
        }
        Ok(())
    }
}

/// Label and cause for one row of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: AnomalyLabel,
    pub cause: DegradationCause,
}

impl Verdict {
    pub fn normal() -> Self {
        Self::default()
    }

    /// A scorer label carried forward without cause attribution.
    pub fn unexplained(label: AnomalyLabel) -> Self {
        Self {
            label,
            cause: DegradationCause::new(),
        }
    }
}
