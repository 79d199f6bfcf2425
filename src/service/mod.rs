//! Orchestration entry point used by the CLI and by embedding applications.

pub mod diagnosis;

pub use diagnosis::*;

use image::RgbImage;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::{MetricsCalculator, ModelMetrics};
use crate::config::Config;
use crate::data::{DatasetLoader, ImageInput, ImagePreprocessor};
use crate::error::{ClassifierError, Result};
use crate::model::{ModelManager, ModelSlot, TrainingOutcome};
use crate::storage::{BlobStore, LocalStore};
use crate::visualization::HeatmapRenderer;

/// A classification annotated with the slot's persisted metrics
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub label: i32,
    pub class: DiagnosisClass,
    pub info: &'static DiagnosisInfo,
    pub accuracy: f64,
    /// Of the predicted class; 0 when the metrics have no entry for it
    pub precision: f64,
    pub recall: f64,
}

pub struct ClassificationService {
    config: Config,
    manager: ModelManager,
    store: Arc<dyn BlobStore>,
    loader: DatasetLoader,
    renderer: HeatmapRenderer,
}

impl ClassificationService {
    pub fn new(config: Config, store: Arc<dyn BlobStore>) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| ClassifierError::InvalidConfig(errors.join("; ")))?;

        Ok(Self {
            manager: ModelManager::new(&config)?,
            loader: DatasetLoader::from_config(&config.dataset),
            renderer: HeatmapRenderer::from_config(&config.heatmap)?,
            store,
            config,
        })
    }

    /// Service backed by files under `config.storage.root`
    pub fn with_local_store(config: Config) -> Result<Self> {
        let store = Arc::new(LocalStore::new(config.storage.root.clone()));
        Self::new(config, store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn is_ready(&self) -> bool {
        self.manager.is_ready()
    }

    /// Load persisted models on the blocking pool. Returns immediately;
    /// inference fails with `ModelsNotReady` until the task finishes.
    pub fn preload(self: Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::task::spawn_blocking(move || {
            self.load_models();
            Ok(())
        })
    }

    /// Synchronous load; a no-op if loading was already claimed
    pub fn load_models(&self) -> bool {
        self.manager
            .load_models(self.store.as_ref(), &self.config.storage)
    }

    /// Scan a class-per-directory dataset, train one slot and persist
    /// the model together with its metrics
    pub fn train_from_directory<P: AsRef<Path>>(
        &self,
        path: P,
        is_patch_model: bool,
    ) -> Result<TrainingOutcome> {
        self.manager.ensure_ready()?;
        let slot = ModelSlot::from_patch_flag(is_patch_model);

        let dataset = self.loader.load(path)?;
        let outcome = self
            .manager
            .train_with_commit(slot, &dataset, |outcome| self.persist(outcome))?;

        tracing::info!(
            "The {} model was trained on {} samples with accuracy {:.4}",
            slot,
            outcome.samples,
            outcome.metrics.accuracy
        );
        Ok(outcome)
    }

    /// Write the model and its metrics as one pair.
    ///
    /// Both documents are serialised before anything is written. If the
    /// metrics write fails the model key is put back to what it held before,
    /// so the stored pair always belongs to one training run.
    fn persist(&self, outcome: &TrainingOutcome) -> Result<()> {
        let keys = &self.config.storage;
        let model_key = keys.model_key(outcome.slot);
        let metrics_key = keys.metrics_key(outcome.slot);

        let model_bytes = outcome.model.to_json_bytes()?;
        let metrics_bytes = MetricsCalculator::to_json(&outcome.metrics)?;
        let previous_model = if self.store.exists(model_key) {
            Some(self.store.load(model_key)?)
        } else {
            None
        };

        self.store.save(model_key, &model_bytes)?;
        if let Err(e) = self.store.save(metrics_key, &metrics_bytes) {
            tracing::error!("Failed to save metrics to '{}': {}", metrics_key, e);
            let rollback = match &previous_model {
                Some(bytes) => self.store.save(model_key, bytes),
                None => self.store.delete(model_key),
            };
            if let Err(cleanup) = rollback {
                tracing::warn!("Could not restore '{}' after a failed save: {}", model_key, cleanup);
            }
            return Err(e);
        }
        tracing::debug!("Saved '{}' and '{}'", model_key, metrics_key);
        Ok(())
    }

    pub fn classify<'a>(&self, image: impl Into<ImageInput<'a>>, is_patch_model: bool) -> Result<i32> {
        self.manager
            .classify(image, ModelSlot::from_patch_flag(is_patch_model))
    }

    /// Rendered heatmap, blended over the input when overlays are enabled
    pub fn generate_heatmap<'a>(
        &self,
        image: impl Into<ImageInput<'a>>,
        is_patch_model: bool,
    ) -> Result<RgbImage> {
        let input = image.into();
        let raw = self
            .manager
            .heatmap_scores(input, ModelSlot::from_patch_flag(is_patch_model))?;

        let base = if self.config.heatmap.overlay {
            Some(ImagePreprocessor::load_rgb(input)?)
        } else {
            None
        };
        Ok(self.renderer.render(&raw, base.as_ref()))
    }

    /// Colour map of `from - to` score maps, not blended
    pub fn generate_difference_heatmap<'a, 'b>(
        &self,
        from: impl Into<ImageInput<'a>>,
        to: impl Into<ImageInput<'b>>,
        is_patch_model: bool,
    ) -> Result<RgbImage> {
        let slot = ModelSlot::from_patch_flag(is_patch_model);
        let from = self.manager.heatmap_scores(from, slot)?;
        let to = self.manager.heatmap_scores(to, slot)?;
        let diff = HeatmapRenderer::difference(&from, &to)?;
        Ok(self.renderer.render(&diff, None))
    }

    /// Image-level metrics over a labelled set of files
    pub fn evaluate(&self, images: &[PathBuf], labels: &[i32], is_patch_model: bool) -> Result<ModelMetrics> {
        self.manager.ensure_ready()?;
        if images.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                features: images.len(),
                labels: labels.len(),
            });
        }

        let predictions = images
            .par_iter()
            .map(|path| self.classify(path, is_patch_model))
            .collect::<Result<Vec<i32>>>()?;
        MetricsCalculator::from_predictions(labels, &predictions)
    }

    pub fn load_metrics(&self, is_patch_model: bool) -> Result<ModelMetrics> {
        let key = self
            .config
            .storage
            .metrics_key(ModelSlot::from_patch_flag(is_patch_model));
        MetricsCalculator::load(self.store.as_ref(), key)
    }

    /// Classification plus diagnosis text and the slot's stored metrics
    pub fn analyze<'a>(&self, image: impl Into<ImageInput<'a>>, is_patch_model: bool) -> Result<AnalysisReport> {
        let label = self.classify(image, is_patch_model)?;
        let metrics = self.load_metrics(is_patch_model)?;
        let class = DiagnosisClass::from_label(label);
        let (precision, recall) = metrics
            .class(label)
            .map(|m| (m.precision, m.recall))
            .unwrap_or((0.0, 0.0));

        Ok(AnalysisReport {
            label,
            class,
            info: class.info(),
            accuracy: metrics.accuracy,
            precision,
            recall,
        })
    }

    /// How many patches voted for each class
    pub fn patch_pathologies<'a>(&self, image: impl Into<ImageInput<'a>>) -> Result<BTreeMap<i32, usize>> {
        self.manager.patch_votes(image)
    }

    pub fn diagnosis_for(label: i32) -> &'static DiagnosisInfo {
        diagnosis_for(label)
    }
}
