//! Linear multi-class C-support-vector classifier.
//!
//! Multi-class problems are decomposed one-vs-rest. Each binary problem
//! minimises the L1-loss (hinge) primal
//!
//! ```text
//! min  ½‖w‖² + C Σᵢ max(0, 1 − yᵢ(w·xᵢ + b))
//! ```
//!
//! through its dual with coordinate descent (Hsieh et al., 2008). The bias is
//! treated as the weight of a constant feature of value 1.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SvmConfig;
use crate::data::ModelGeometry;
use crate::error::{ClassifierError, Result};

/// What the metrics calculator and the model manager need from a fitted model
pub trait Classifier: Send + Sync {
    /// Input dimensionality the model was trained with
    fn n_features(&self) -> usize;

    /// Known class labels in ascending order
    fn classes(&self) -> &[i32];

    /// One decision value per class, aligned with `classes()`
    fn decision_values(&self, features: ArrayView1<'_, f32>) -> Result<Vec<f32>>;

    /// Winning label and its decision value. Ties go to the lowest label.
    fn predict_with_score(&self, features: ArrayView1<'_, f32>) -> Result<(i32, f32)> {
        let values = self.decision_values(features)?;
        let mut best: Option<(i32, f32)> = None;
        for (&label, &value) in self.classes().iter().zip(values.iter()) {
            match best {
                Some((_, best_value)) if value <= best_value => {}
                _ => best = Some((label, value)),
            }
        }
        best.ok_or_else(|| ClassifierError::InsufficientData("model has no classes".to_string()))
    }

    fn predict(&self, features: ArrayView1<'_, f32>) -> Result<i32> {
        Ok(self.predict_with_score(features)?.0)
    }
}

/// Fitted model; the persisted artifact is this struct as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvm {
    kernel: String,
    c: f32,
    gamma: f32,
    geometry: ModelGeometry,
    n_features: usize,
    classes: Vec<i32>,
    /// One row per class
    weights: Array2<f32>,
    biases: Vec<f32>,
    samples: usize,
    trained_at: DateTime<Utc>,
}

impl LinearSvm {
    /// Assemble a model from already known parameters
    pub fn from_parts(
        geometry: ModelGeometry,
        classes: Vec<i32>,
        weights: Array2<f32>,
        biases: Vec<f32>,
    ) -> Result<Self> {
        let defaults = SvmConfig::default();
        let model = Self {
            kernel: "linear".to_string(),
            c: defaults.c,
            gamma: defaults.gamma,
            geometry,
            n_features: weights.ncols(),
            classes,
            weights,
            biases,
            samples: 0,
            trained_at: Utc::now(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn geometry(&self) -> ModelGeometry {
        self.geometry
    }

    pub fn c(&self) -> f32 {
        self.c
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    /// Predict every row of a feature matrix
    pub fn predict_batch(&self, x: ArrayView2<'_, f32>) -> Result<Vec<i32>> {
        x.axis_iter(Axis(0)).map(|row| self.predict(row)).collect()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let model: Self = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.kernel != "linear" {
            return Err(ClassifierError::InvalidConfig(format!(
                "unsupported kernel '{}'",
                self.kernel
            )));
        }
        if self.classes.is_empty() || self.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ClassifierError::InvalidConfig(
                "model classes must be non-empty and strictly ascending".to_string(),
            ));
        }
        if self.weights.nrows() != self.classes.len() || self.biases.len() != self.classes.len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.classes.len(),
                actual: self.weights.nrows().min(self.biases.len()),
            });
        }
        if self.weights.ncols() != self.n_features || self.n_features != self.geometry.feature_len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.geometry.feature_len(),
                actual: self.weights.ncols(),
            });
        }
        Ok(())
    }
}

impl Classifier for LinearSvm {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn classes(&self) -> &[i32] {
        &self.classes
    }

    fn decision_values(&self, features: ArrayView1<'_, f32>) -> Result<Vec<f32>> {
        if features.len() != self.n_features {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.n_features,
                actual: features.len(),
            });
        }
        let scores = self.weights.dot(&features);
        Ok(scores
            .iter()
            .zip(self.biases.iter())
            .map(|(s, b)| s + b)
            .collect())
    }
}

/// Training hyperparameters
#[derive(Debug, Clone)]
pub struct SvmTrainer {
    c: f32,
    gamma: f32,
    max_iter: usize,
    tol: f32,
    seed: u64,
}

impl Default for SvmTrainer {
    fn default() -> Self {
        Self::from_config(&SvmConfig::default())
    }
}

impl SvmTrainer {
    pub fn from_config(config: &SvmConfig) -> Self {
        Self {
            c: config.c,
            gamma: config.gamma,
            max_iter: config.max_iter,
            tol: config.tolerance,
            seed: config.seed,
        }
    }

    /// Larger C means less regularization
    pub fn with_c(mut self, c: f32) -> Self {
        self.c = c;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tolerance(mut self, tol: f32) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fit one-vs-rest binary machines, one per distinct label in `y`
    pub fn fit(&self, x: ArrayView2<'_, f32>, y: &[i32], geometry: ModelGeometry) -> Result<LinearSvm> {
        if x.nrows() != y.len() {
            return Err(ClassifierError::LengthMismatch {
                features: x.nrows(),
                labels: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(ClassifierError::InsufficientData("no training samples".to_string()));
        }
        if x.ncols() != geometry.feature_len() {
            return Err(ClassifierError::DimensionMismatch {
                expected: geometry.feature_len(),
                actual: x.ncols(),
            });
        }
        if let Some(&label) = y.iter().find(|&&l| l < 0) {
            return Err(ClassifierError::InvalidLabel(label));
        }

        let mut classes: Vec<i32> = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(ClassifierError::InsufficientData(format!(
                "need at least two classes, found {}",
                classes.len()
            )));
        }

        let row_norms: Vec<f32> = x.axis_iter(Axis(0)).map(|row| row.dot(&row) + 1.0).collect();

        let machines: Vec<(Array1<f32>, f32)> = classes
            .par_iter()
            .enumerate()
            .map(|(k, &class)| {
                let targets: Vec<f32> = y
                    .iter()
                    .map(|&label| if label == class { 1.0 } else { -1.0 })
                    .collect();
                self.fit_binary(x, &targets, &row_norms, self.seed.wrapping_add(k as u64))
            })
            .collect();

        let mut weights = Array2::<f32>::zeros((classes.len(), x.ncols()));
        let mut biases = Vec::with_capacity(classes.len());
        for (k, (w, b)) in machines.into_iter().enumerate() {
            weights.row_mut(k).assign(&w);
            biases.push(b);
        }

        let model = LinearSvm {
            kernel: "linear".to_string(),
            c: self.c,
            gamma: self.gamma,
            geometry,
            n_features: x.ncols(),
            classes,
            weights,
            biases,
            samples: x.nrows(),
            trained_at: Utc::now(),
        };
        model.validate()?;
        Ok(model)
    }

    fn fit_binary(
        &self,
        x: ArrayView2<'_, f32>,
        targets: &[f32],
        row_norms: &[f32],
        seed: u64,
    ) -> (Array1<f32>, f32) {
        let n = x.nrows();
        let mut alpha = vec![0.0f32; n];
        let mut w = Array1::<f32>::zeros(x.ncols());
        let mut b = 0.0f32;
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        for epoch in 0..self.max_iter {
            order.shuffle(&mut rng);
            let mut pg_max = f32::NEG_INFINITY;
            let mut pg_min = f32::INFINITY;

            for &i in &order {
                let row = x.row(i);
                let y_i = targets[i];
                let g = y_i * (w.dot(&row) + b) - 1.0;

                let pg = if alpha[i] <= 0.0 {
                    g.min(0.0)
                } else if alpha[i] >= self.c {
                    g.max(0.0)
                } else {
                    g
                };
                pg_max = pg_max.max(pg);
                pg_min = pg_min.min(pg);

                if pg.abs() > 1e-12 {
                    let previous = alpha[i];
                    alpha[i] = (previous - g / row_norms[i]).clamp(0.0, self.c);
                    let delta = (alpha[i] - previous) * y_i;
                    if delta != 0.0 {
                        w.scaled_add(delta, &row);
                        b += delta;
                    }
                }
            }

            if pg_max - pg_min <= self.tol {
                tracing::trace!(epoch, gap = pg_max - pg_min, "Binary SVM converged");
                break;
            }
        }

        (w, b)
    }
}
