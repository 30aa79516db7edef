use serde::{Deserialize, Serialize};

use super::model::Scaler;
use crate::detect::DetectError;

/// Fitted standardization: `(x - mean) / scale` per column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.mean.is_empty() {
            return Err(DetectError::artifact("scaler", "no fitted columns"));
        }
        if self.mean.len() != self.scale.len() {
            return Err(DetectError::artifact(
                "scaler",
                format!(
                    "mean has {} columns but scale has {}",
                    self.mean.len(),
                    self.scale.len()
                ),
            ));
        }
        Ok(())
    }
}

impl Scaler for StandardScaler {
    fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn transform(&self, matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
        matrix
            .iter()
            .map(|row| {
                row.iter()
                    .zip(self.mean.iter().zip(&self.scale))
                    .map(|(x, (mean, scale))| {
                        // Constant columns were fitted with zero variance.
                        let s = if *scale == 0.0 { 1.0 } else { *scale };
                        (x - mean) / s
                    })
                    .collect()
            })
            .collect()
    }
}
