//! Gradient-boosted tree scorers
//!
//! Models are trained offline and exported as a JSON dump of regression
//! trees. Scoring sums one leaf per tree onto the base score; a logistic
//! objective maps that margin to the EV probability.
//!
//! ```json
//! {
//!   "name": "xgb",
//!   "objective": "logistic",
//!   "base_score": 0.0,
//!   "num_features": 768,
//!   "trees": [
//!     {"nodes": [
//!       {"feature": 60, "threshold": 1200.5, "left": 1, "right": 2},
//!       {"leaf": 0.42},
//!       {"leaf": -0.37}
//!     ]}
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ModelError;

/// Binary EV scorer
pub trait PowertrainScorer: Send + Sync {
    /// Short label recorded as `model_used`
    fn name(&self) -> &str;

    /// EV label
    fn predict(&self, features: &[f32]) -> Result<bool, ModelError>;

    /// EV probability, or `None` for a label-only scorer
    fn probability(&self, features: &[f32]) -> Result<Option<f32>, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    /// Margin passed through a sigmoid
    Logistic,
    /// Margin is already a probability-like score
    Identity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Node {
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
        /// Branch taken for a NaN feature value
        #[serde(default = "default_true")]
        default_left: bool,
    },
    Leaf {
        leaf: f32,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn leaf_value(&self, features: &[f32]) -> f32 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { leaf } => return *leaf,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = features[*feature];
                    let go_left = if value.is_nan() {
                        *default_left
                    } else {
                        value < *threshold
                    };
                    index = if go_left { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ModelDump {
    name: String,
    objective: Objective,
    #[serde(default)]
    base_score: f32,
    num_features: usize,
    #[serde(default = "default_true")]
    supports_probability: bool,
    trees: Vec<Tree>,
}

/// Sum-of-trees model loaded from a JSON dump
#[derive(Debug, Clone)]
pub struct TreeEnsembleModel {
    name: String,
    objective: Objective,
    base_score: f32,
    num_features: usize,
    supports_probability: bool,
    trees: Vec<Tree>,
}

impl TreeEnsembleModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let dump: ModelDump = serde_json::from_str(&content).map_err(|source| ModelError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_dump(dump)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let dump: ModelDump = serde_json::from_str(json).map_err(|source| ModelError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::from_dump(dump)
    }

    /// Children must point forward so every walk terminates
    fn from_dump(dump: ModelDump) -> Result<Self, ModelError> {
        if dump.trees.is_empty() {
            return Err(ModelError::Invalid(format!("model {} has no trees", dump.name)));
        }

        for (t, tree) in dump.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ModelError::Invalid(format!("tree {t} is empty")));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                if let Node::Split {
                    feature, left, right, ..
                } = node
                {
                    if *feature >= dump.num_features {
                        return Err(ModelError::Invalid(format!(
                            "tree {t} node {i} uses feature {feature} of {}",
                            dump.num_features
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= tree.nodes.len() {
                            return Err(ModelError::Invalid(format!(
                                "tree {t} node {i} has bad child index {child}"
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self {
            name: dump.name,
            objective: dump.objective,
            base_score: dump.base_score,
            num_features: dump.num_features,
            supports_probability: dump.supports_probability,
            trees: dump.trees,
        })
    }

    pub fn supports_probability(&self) -> bool {
        self.supports_probability
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Label-only variant of the same trees
    pub fn without_probability(mut self) -> Self {
        self.supports_probability = false;
        self
    }

    fn margin(&self, features: &[f32]) -> Result<f32, ModelError> {
        if features.len() < self.num_features {
            return Err(ModelError::FeatureCount {
                expected: self.num_features,
                actual: features.len(),
            });
        }
        Ok(self.base_score + self.trees.iter().map(|t| t.leaf_value(features)).sum::<f32>())
    }

    fn score(&self, features: &[f32]) -> Result<f32, ModelError> {
        let margin = self.margin(features)?;
        Ok(match self.objective {
            Objective::Logistic => 1.0 / (1.0 + (-margin).exp()),
            Objective::Identity => margin.clamp(0.0, 1.0),
        })
    }
}

impl PowertrainScorer for TreeEnsembleModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &[f32]) -> Result<bool, ModelError> {
        Ok(self.score(features)? >= 0.5)
    }

    fn probability(&self, features: &[f32]) -> Result<Option<f32>, ModelError> {
        if !self.supports_probability {
            return Ok(None);
        }
        self.score(features).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUMP: &str = r#"{
        "name": "stump",
        "objective": "logistic",
        "base_score": 0.0,
        "num_features": 2,
        "trees": [
            {"nodes": [
                {"feature": 0, "threshold": 10.0, "left": 1, "right": 2},
                {"leaf": -2.0},
                {"leaf": 2.0}
            ]},
            {"nodes": [{"leaf": 0.5}]}
        ]
    }"#;

    #[test]
    fn test_scoring_follows_splits() {
        let model = TreeEnsembleModel::from_json(STUMP).unwrap();
        let low = model.probability(&[5.0, 0.0]).unwrap().unwrap();
        let high = model.probability(&[50.0, 0.0]).unwrap().unwrap();
        assert!((low - 1.0 / (1.0 + 1.5f32.exp())).abs() < 1e-6);
        assert!(high > 0.9);
        assert!(!model.predict(&[5.0, 0.0]).unwrap());
        assert!(model.predict(&[50.0, 0.0]).unwrap());
        // NaN follows the default (left) branch
        assert!(!model.predict(&[f32::NAN, 0.0]).unwrap());
    }

    #[test]
    fn test_label_only_variant() {
        let model = TreeEnsembleModel::from_json(STUMP).unwrap().without_probability();
        assert_eq!(model.probability(&[50.0, 0.0]).unwrap(), None);
        assert!(model.predict(&[50.0, 0.0]).unwrap());
    }

    #[test]
    fn test_rejects_short_feature_vector() {
        let model = TreeEnsembleModel::from_json(STUMP).unwrap();
        assert!(matches!(
            model.predict(&[1.0]),
            Err(ModelError::FeatureCount { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_rejects_malformed_dumps() {
        let backwards = STUMP.replace(r#""left": 1"#, r#""left": 0"#);
        assert!(TreeEnsembleModel::from_json(&backwards).is_err());

        let bad_feature = STUMP.replace(r#""feature": 0"#, r#""feature": 9"#);
        assert!(TreeEnsembleModel::from_json(&bad_feature).is_err());

        assert!(TreeEnsembleModel::from_json("{").is_err());
    }
}
