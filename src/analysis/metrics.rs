use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ClassifierError, Result};
use crate::model::Classifier;
use crate::storage::BlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Evaluation summary of one model, persisted next to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetrics {
    pub accuracy: f64,
    /// Rows are actual labels, columns predicted labels
    pub confusion_matrix: Vec<Vec<u32>>,
    pub per_class_metrics: BTreeMap<i32, ClassMetrics>,
}

impl ModelMetrics {
    pub fn empty() -> Self {
        Self {
            accuracy: 0.0,
            confusion_matrix: Vec::new(),
            per_class_metrics: BTreeMap::new(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.confusion_matrix.len()
    }

    pub fn class(&self, label: i32) -> Option<&ClassMetrics> {
        self.per_class_metrics.get(&label)
    }

    pub fn support(&self, label: i32) -> u32 {
        usize::try_from(label)
            .ok()
            .and_then(|i| self.confusion_matrix.get(i))
            .map(|row| row.iter().sum())
            .unwrap_or(0)
    }
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Predict every row of `features` and score it against `labels`
    pub fn compute(
        model: &dyn Classifier,
        features: ArrayView2<'_, f32>,
        labels: &[i32],
    ) -> Result<ModelMetrics> {
        if features.nrows() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                features: features.nrows(),
                labels: labels.len(),
            });
        }
        let predictions = features
            .axis_iter(Axis(0))
            .map(|row| model.predict(row))
            .collect::<Result<Vec<i32>>>()?;
        Self::from_predictions(labels, &predictions)
    }

    pub fn from_predictions(labels: &[i32], predictions: &[i32]) -> Result<ModelMetrics> {
        if labels.len() != predictions.len() {
            return Err(ClassifierError::LengthMismatch {
                features: predictions.len(),
                labels: labels.len(),
            });
        }
        if let Some(&label) = labels.iter().chain(predictions).find(|&&l| l < 0) {
            return Err(ClassifierError::InvalidLabel(label));
        }

        let confusion_matrix = Self::confusion_matrix(labels, predictions);
        Ok(ModelMetrics {
            accuracy: Self::accuracy(labels, predictions),
            per_class_metrics: Self::per_class_metrics(&confusion_matrix),
            confusion_matrix,
        })
    }

    /// Exact-match fraction; 0 for empty input
    pub fn accuracy(labels: &[i32], predictions: &[i32]) -> f64 {
        if labels.is_empty() {
            return 0.0;
        }
        let correct = labels
            .iter()
            .zip(predictions)
            .filter(|(actual, predicted)| actual == predicted)
            .count();
        correct as f64 / labels.len() as f64
    }

    /// Square matrix sized by the largest label seen on either side.
    /// Callers must have rejected negative labels.
    pub fn confusion_matrix(labels: &[i32], predictions: &[i32]) -> Vec<Vec<u32>> {
        let size = labels
            .iter()
            .chain(predictions)
            .copied()
            .max()
            .map(|max| max.max(0) as usize + 1)
            .unwrap_or(0);

        let mut matrix = vec![vec![0u32; size]; size];
        for (&actual, &predicted) in labels.iter().zip(predictions) {
            matrix[actual as usize][predicted as usize] += 1;
        }
        matrix
    }

    pub fn per_class_metrics(matrix: &[Vec<u32>]) -> BTreeMap<i32, ClassMetrics> {
        let n = matrix.len();
        (0..n)
            .map(|i| {
                let tp = matrix[i][i] as f64;
                let predicted: u32 = (0..n).map(|row| matrix[row][i]).sum();
                let actual: u32 = matrix[i].iter().sum();

                let precision = ratio(tp, predicted as f64);
                let recall = ratio(tp, actual as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                (i as i32, ClassMetrics { precision, recall, f1 })
            })
            .collect()
    }

    pub fn to_json(metrics: &ModelMetrics) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(metrics)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<ModelMetrics> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn save(store: &dyn BlobStore, key: &str, metrics: &ModelMetrics) -> Result<()> {
        store.save(key, &Self::to_json(metrics)?)
    }

    pub fn load(store: &dyn BlobStore, key: &str) -> Result<ModelMetrics> {
        Self::from_json(&store.load(key)?)
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
