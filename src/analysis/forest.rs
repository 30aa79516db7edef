//! Isolation forest inference.
//!
//! Only the fitted structure is read here; training happens offline. Raw
//! predictions follow the usual outlier-detector convention of `-1` for
//! outliers and `1` for inliers.

use serde::{Deserialize, Serialize};

use super::model::{Classifier, INLIER, OUTLIER};
use crate::detect::DetectError;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub n_features: usize,
    /// Sub-sample size each tree was grown on.
    pub max_samples: usize,
    /// Decision offset; rows scoring below it are outliers.
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    /// Node 0 is the root.
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

impl IsolationTree {
    fn path_length(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        // Bounded by the node count; validate() rules out cycles reaching further.
        for _ in 0..self.nodes.len() {
            match &self.nodes[idx] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
        depth
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(format!("node {i} splits on feature {feature} of {n_features}"));
                }
                // Children always follow their parent in node order.
                if *left <= i || *right <= i || *left >= self.nodes.len() || *right >= self.nodes.len() {
                    return Err(format!("node {i} has out-of-range children"));
                }
            }
        }
        Ok(())
    }
}

impl IsolationForest {
    pub fn validate(&self) -> Result<(), DetectError> {
        if self.n_features == 0 {
            return Err(DetectError::artifact("classifier", "model expects zero features"));
        }
        if self.trees.is_empty() {
            return Err(DetectError::artifact("classifier", "forest has no trees"));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| DetectError::artifact("classifier", format!("tree {t}: {e}")))?;
        }
        Ok(())
    }

    /// Anomaly score in `[-1, 0]`; lower means more anomalous.
    pub fn score_sample(&self, row: &[f64]) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(row))
            .sum::<f64>()
            / self.trees.len() as f64;
        let norm = average_path_length(self.max_samples);
        if norm == 0.0 {
            return -1.0;
        }
        -(2f64.powf(-mean_path / norm))
    }
}

impl Classifier for IsolationForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, matrix: &[Vec<f64>]) -> Vec<i32> {
        matrix
            .iter()
            .map(|row| {
                if self.score_sample(row) - self.offset < 0.0 {
                    OUTLIER
                } else {
                    INLIER
                }
            })
            .collect()
    }
}
