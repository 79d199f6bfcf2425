//! Structured spans for training runs and inference requests

use std::time::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

use crate::model::ModelSlot;

/// Span covering one training call for one model slot
pub struct TrainingSpan {
    span: Span,
    start_time: Instant,
}

impl TrainingSpan {
    pub fn new(slot: ModelSlot, correlation_id: Option<Uuid>) -> Self {
        let correlation_id = correlation_id.or_else(crate::logging::get_correlation_id);
        let span = span!(
            Level::INFO,
            "svm_training",
            slot = %slot,
            correlation_id = field::Empty,
            images = field::Empty,
            samples = field::Empty,
            features = field::Empty,
            classes = field::Empty,
            accuracy = field::Empty,
            execution_time_ms = field::Empty,
        );
        if let Some(id) = correlation_id {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record the assembled training matrix
    pub fn record_training_set(&self, images: usize, samples: usize, features: usize) {
        self.span.record("images", images);
        self.span.record("samples", samples);
        self.span.record("features", features);
        tracing::debug!(
            parent: &self.span,
            images,
            samples,
            features,
            "Training matrix assembled"
        );
    }

    /// Record the fitted model and its training-set accuracy
    pub fn record_result(&self, classes: usize, accuracy: f64) {
        let duration = self.start_time.elapsed();
        self.span.record("classes", classes);
        self.span.record("accuracy", accuracy);
        self.span.record("execution_time_ms", duration.as_millis() as f64);
        tracing::info!(
            parent: &self.span,
            classes,
            accuracy = format!("{:.4}", accuracy),
            execution_time_ms = duration.as_millis(),
            "SVM training completed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span covering one classification or heatmap request
pub struct InferenceSpan {
    span: Span,
    start_time: Instant,
}

impl InferenceSpan {
    pub fn new(operation: &str, slot: ModelSlot) -> Self {
        let span = span!(
            Level::DEBUG,
            "svm_inference",
            operation = operation,
            slot = %slot,
            correlation_id = field::Empty,
            windows = field::Empty,
            label = field::Empty,
            execution_time_ms = field::Empty,
        );
        if let Some(id) = crate::logging::get_correlation_id() {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record how many feature windows were scored
    pub fn record_windows(&self, windows: usize) {
        self.span.record("windows", windows);
    }

    pub fn record_label(&self, label: i32) {
        let duration = self.start_time.elapsed();
        self.span.record("label", label);
        self.span.record("execution_time_ms", duration.as_millis() as f64);
        tracing::debug!(
            parent: &self.span,
            label,
            execution_time_ms = duration.as_millis(),
            "Inference completed"
        );
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
