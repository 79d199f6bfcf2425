use std::path::PathBuf;
use thiserror::Error;

use crate::model::ModelSlot;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Unreadable image {source_name}: {reason}")]
    UnreadableImage { source_name: String, reason: String },

    #[error("Invalid dataset path: {}", path.display())]
    InvalidDatasetPath { path: PathBuf },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("SVM models are still loading, try again later")]
    ModelsNotReady,

    #[error("Length mismatch: {features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("The {0} model has not been trained or loaded")]
    UntrainedModel(ModelSlot),

    #[error("Insufficient training data: {0}")]
    InsufficientData(String),

    #[error("Invalid class label {0}")]
    InvalidLabel(i32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage failure for '{key}': {source}")]
    Storage {
        key: String,
        source: std::io::Error,
    },

    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image encoding failure: {0}")]
    ImageEncoding(#[from] image::ImageError),
}

impl ClassifierError {
    pub fn unreadable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::UnreadableImage {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Transient errors the caller should retry after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ModelsNotReady)
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
