use std::fmt;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::info;

use super::forest::IsolationForest;
use super::scaler::StandardScaler;
use crate::detect::DetectError;

pub const MODEL_FILE: &str = "model.json";
pub const FEATURES_FILE: &str = "num_params.json";
pub const SCALER_FILE: &str = "scale.json";

/// Raw classifier output for an outlier row.
pub const OUTLIER: i32 = -1;
/// Raw classifier output for an inlier row.
pub const INLIER: i32 = 1;

/// Pre-trained binary outlier model.
pub trait Classifier: Send + Sync {
    /// Width of the rows `predict` expects.
    fn n_features(&self) -> usize;

    /// One raw label ([`OUTLIER`] or [`INLIER`]) per input row.
    fn predict(&self, matrix: &[Vec<f64>]) -> Vec<i32>;
}

/// Fitted feature transform applied before classification.
pub trait Scaler: Send + Sync {
    fn n_features(&self) -> usize;

    fn transform(&self, matrix: &[Vec<f64>]) -> Vec<Vec<f64>>;
}

/// Classifier, feature list and scaler, loaded together and never mutated.
pub struct ModelArtifact {
    classifier: Box<dyn Classifier>,
    features: Vec<String>,
    scaler: Box<dyn Scaler>,
}

impl fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl ModelArtifact {
    /// Assemble an artifact, checking that all three parts agree on width.
    pub fn new(
        classifier: Box<dyn Classifier>,
        features: Vec<String>,
        scaler: Box<dyn Scaler>,
    ) -> Result<Self, DetectError> {
        if features.is_empty() {
            return Err(DetectError::artifact("features", "feature list is empty"));
        }
        if scaler.n_features() != features.len() {
            return Err(DetectError::artifact(
                "scaler",
                format!(
                    "fitted on {} columns, feature list names {}",
                    scaler.n_features(),
                    features.len()
                ),
            ));
        }
        if classifier.n_features() != features.len() {
            return Err(DetectError::artifact(
                "classifier",
                format!(
                    "expects {} columns, feature list names {}",
                    classifier.n_features(),
                    features.len()
                ),
            ));
        }
        Ok(Self {
            classifier,
            features,
            scaler,
        })
    }

    /// Load `model.json`, `num_params.json` and `scale.json` from `dir`.
    ///
    /// Any missing or undecodable part fails the whole load.
    pub fn load(dir: &Path) -> Result<Self, DetectError> {
        let forest: IsolationForest = read_json(&dir.join(MODEL_FILE), "classifier")?;
        forest.validate()?;
        let features: Vec<String> = read_json(&dir.join(FEATURES_FILE), "features")?;
        let scaler: StandardScaler = read_json(&dir.join(SCALER_FILE), "scaler")?;
        scaler.validate()?;

        let artifact = Self::new(Box::new(forest), features, Box::new(scaler))?;
        info!(
            dir = %dir.display(),
            features = artifact.features.len(),
            "loaded model artifact"
        );
        Ok(artifact)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn scaler(&self) -> &dyn Scaler {
        self.scaler.as_ref()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path, component: &'static str) -> Result<T, DetectError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DetectError::artifact(component, format!("{}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| DetectError::artifact(component, format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::forest::tests::threshold_forest;

    fn write_artifact(dir: &Path) {
        fs::write(
            dir.join(MODEL_FILE),
            serde_json::to_string(&threshold_forest()).unwrap(),
        )
        .unwrap();
        fs::write(dir.join(FEATURES_FILE), r#"["DRB.UEThpDl"]"#).unwrap();
        fs::write(dir.join(SCALER_FILE), r#"{"mean":[0.0],"scale":[1.0]}"#).unwrap();
    }

    #[test]
    fn test_load_complete_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path());

        let artifact = ModelArtifact::load(dir.path()).unwrap();
        assert_eq!(artifact.features(), ["DRB.UEThpDl"]);
        assert_eq!(artifact.classifier().n_features(), 1);
        assert_eq!(artifact.scaler().n_features(), 1);
    }

    #[test]
    fn test_missing_scaler_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path());
        fs::remove_file(dir.path().join(SCALER_FILE)).unwrap();

        let err = ModelArtifact::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            DetectError::ArtifactMissing { component: "scaler", .. }
        ));
    }

    #[test]
    fn test_undecodable_model_is_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path());
        fs::write(dir.path().join(MODEL_FILE), "not json").unwrap();

        let err = ModelArtifact::load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            DetectError::ArtifactMissing { component: "classifier", .. }
        ));
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path());
        fs::write(dir.path().join(FEATURES_FILE), r#"["a", "b"]"#).unwrap();

        let err = ModelArtifact::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("feature list names 2"));
    }

    #[test]
    fn test_empty_feature_list_is_rejected() {
        let err = ModelArtifact::new(
            Box::new(threshold_forest()),
            Vec::new(),
            Box::new(StandardScaler {
                mean: vec![0.0],
                scale: vec![1.0],
            }),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DetectError::ArtifactMissing { component: "features", .. }
        ));
    }
}
