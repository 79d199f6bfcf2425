//! Owner of the whole-image and patch models.
//!
//! The manager moves through `NotReady -> Loading -> Ready` exactly once.
//! Inference is refused until `Ready`; retraining swaps a slot's model in
//! place and never moves the state backwards.

use ndarray::{s, Array2, ArrayView1};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::svm::{Classifier, LinearSvm, SvmTrainer};
use super::ModelSlot;
use crate::analysis::{MetricsCalculator, ModelMetrics};
use crate::config::{Config, HeatmapScore, StorageConfig};
use crate::data::{Dataset, ImageInput, ImagePreprocessor, ModelGeometry, PatchExtractor, UNLABELED};
use crate::error::{ClassifierError, Result};
use crate::logging::spans::{InferenceSpan, TrainingSpan};
use crate::logging::LogContext;
use crate::storage::BlobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadinessState {
    NotReady = 0,
    Loading = 1,
    Ready = 2,
}

impl ReadinessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadinessState::NotReady,
            1 => ReadinessState::Loading,
            _ => ReadinessState::Ready,
        }
    }
}

#[derive(Default)]
struct SlotHandle {
    model: RwLock<Option<Arc<LinearSvm>>>,
    training: Mutex<()>,
}

impl SlotHandle {
    fn get(&self) -> Option<Arc<LinearSvm>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, model: Arc<LinearSvm>) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(model);
    }
}

/// Result of one successful training call
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub slot: ModelSlot,
    pub model: Arc<LinearSvm>,
    /// Scored on the training rows themselves
    pub metrics: ModelMetrics,
    pub samples: usize,
    pub classes: Vec<i32>,
}

pub struct ModelManager {
    state: AtomicU8,
    whole: SlotHandle,
    patch: SlotHandle,
    whole_image_size: u32,
    patch_grid_size: u32,
    patch_extractor: PatchExtractor,
    /// Whole-image-sized windows swept over the patch grid for heatmaps
    sweep_extractor: PatchExtractor,
    trainer: SvmTrainer,
    score: HeatmapScore,
}

impl ModelManager {
    pub fn new(config: &Config) -> Result<Self> {
        let patch_extractor = PatchExtractor::from_config(&config.patch)?;
        let sweep_extractor =
            PatchExtractor::new(config.image.whole_image_size as usize, config.patch.stride)?;
        if config.image.whole_image_size > config.image.patch_grid_size {
            return Err(ClassifierError::InvalidConfig(format!(
                "whole image size {} exceeds patch grid size {}",
                config.image.whole_image_size, config.image.patch_grid_size
            )));
        }

        Ok(Self {
            state: AtomicU8::new(ReadinessState::NotReady as u8),
            whole: SlotHandle::default(),
            patch: SlotHandle::default(),
            whole_image_size: config.image.whole_image_size,
            patch_grid_size: config.image.patch_grid_size,
            patch_extractor,
            sweep_extractor,
            trainer: SvmTrainer::from_config(&config.svm),
            score: config.heatmap.score,
        })
    }

    pub fn state(&self) -> ReadinessState {
        ReadinessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    /// Claim the single `NotReady -> Loading` transition
    pub fn begin_loading(&self) -> bool {
        self.state
            .compare_exchange(
                ReadinessState::NotReady as u8,
                ReadinessState::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn mark_ready(&self) {
        self.state.store(ReadinessState::Ready as u8, Ordering::Release);
        tracing::info!("All SVM models are ready");
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ClassifierError::ModelsNotReady)
        }
    }

    /// Load both persisted models and flip to `Ready`.
    ///
    /// Returns `false` without touching the store when another caller already
    /// claimed the load. Missing or unreadable artifacts leave their slot
    /// untrained.
    pub fn load_models(&self, store: &dyn BlobStore, keys: &StorageConfig) -> bool {
        if !self.begin_loading() {
            tracing::debug!("Model loading already claimed, state {:?}", self.state());
            return false;
        }

        for slot in ModelSlot::ALL {
            let key = keys.model_key(slot);
            if !store.exists(key) {
                tracing::warn!(
                    "The {} SVM model could not be found at '{}', slot left untrained",
                    slot,
                    key
                );
                continue;
            }
            match store.load(key).and_then(|bytes| LinearSvm::from_json_bytes(&bytes)) {
                Ok(model) => {
                    self.install(slot, model);
                    tracing::info!("The {} SVM model was loaded from '{}'", slot, key);
                }
                Err(e) => {
                    tracing::error!("Failed to load the {} SVM model from '{}': {}", slot, key, e);
                }
            }
        }

        self.mark_ready();
        true
    }

    fn handle(&self, slot: ModelSlot) -> &SlotHandle {
        match slot {
            ModelSlot::WholeImage => &self.whole,
            ModelSlot::Patch => &self.patch,
        }
    }

    fn extractor(&self, slot: ModelSlot) -> &PatchExtractor {
        match slot {
            ModelSlot::WholeImage => &self.sweep_extractor,
            ModelSlot::Patch => &self.patch_extractor,
        }
    }

    /// Window and stride a model in `slot` must have been trained with
    pub fn expected_geometry(&self, slot: ModelSlot) -> ModelGeometry {
        self.extractor(slot).geometry()
    }

    /// Replace the model in a slot
    pub fn install(&self, slot: ModelSlot, model: LinearSvm) -> Arc<LinearSvm> {
        let model = Arc::new(model);
        self.handle(slot).set(Arc::clone(&model));
        model
    }

    pub fn model(&self, slot: ModelSlot) -> Option<Arc<LinearSvm>> {
        self.handle(slot).get()
    }

    /// Serialised artifact of the model currently in `slot`
    pub fn export_model(&self, slot: ModelSlot) -> Result<Vec<u8>> {
        self.model(slot)
            .ok_or(ClassifierError::UntrainedModel(slot))?
            .to_json_bytes()
    }

    fn active_model(&self, slot: ModelSlot) -> Result<Arc<LinearSvm>> {
        self.ensure_ready()?;
        let model = self.model(slot).ok_or(ClassifierError::UntrainedModel(slot))?;

        let expected = self.expected_geometry(slot);
        let actual = model.geometry();
        if actual.window != expected.window {
            return Err(ClassifierError::DimensionMismatch {
                expected: expected.feature_len(),
                actual: model.n_features(),
            });
        }
        if actual.stride != expected.stride {
            return Err(ClassifierError::DimensionMismatch {
                expected: expected.stride,
                actual: actual.stride,
            });
        }
        Ok(model)
    }

    pub fn train_whole_image(&self, dataset: &Dataset) -> Result<TrainingOutcome> {
        self.train(ModelSlot::WholeImage, dataset)
    }

    pub fn train_patch_model(&self, dataset: &Dataset) -> Result<TrainingOutcome> {
        self.train(ModelSlot::Patch, dataset)
    }

    /// Fit a fresh model for `slot` and swap it in on success
    pub fn train(&self, slot: ModelSlot, dataset: &Dataset) -> Result<TrainingOutcome> {
        self.train_with_commit(slot, dataset, |_| Ok(()))
    }

    /// Fit a fresh model for `slot`, run `commit` on the outcome, then swap
    /// the model in.
    ///
    /// The slot's training lock is held across `commit`, so two trainings of
    /// one slot never interleave their persistence. When `commit` fails the
    /// slot keeps serving its previous model.
    pub fn train_with_commit<F>(
        &self,
        slot: ModelSlot,
        dataset: &Dataset,
        commit: F,
    ) -> Result<TrainingOutcome>
    where
        F: FnOnce(&TrainingOutcome) -> Result<()>,
    {
        let handle = self.handle(slot);
        let _training = handle.training.lock().unwrap_or_else(PoisonError::into_inner);

        let span = TrainingSpan::new(slot, None);
        let _enter = span.enter();
        let outcome = self.fit_outcome(slot, dataset, &span)?;

        commit(&outcome)?;
        handle.set(Arc::clone(&outcome.model));
        Ok(outcome)
    }

    fn fit_outcome(&self, slot: ModelSlot, dataset: &Dataset, span: &TrainingSpan) -> Result<TrainingOutcome> {

        if dataset.is_empty() {
            return Err(ClassifierError::InsufficientData("dataset contains no images".to_string()));
        }
        tracing::info!("Training the {} model on {} images", slot, dataset.len());

        let context = LogContext::capture();
        let per_image: Vec<Vec<Vec<f32>>> = dataset
            .images
            .par_iter()
            .map(|path| context.scope(|| self.training_rows(slot, path)))
            .collect::<Result<_>>()?;

        let geometry = self.expected_geometry(slot);
        let n_features = geometry.feature_len();
        let mut flat = Vec::new();
        let mut labels = Vec::new();
        for (rows, &label) in per_image.into_iter().zip(dataset.labels.iter()) {
            for row in rows {
                flat.extend(row);
                labels.push(label);
            }
        }
        let samples = labels.len();
        if samples == 0 {
            return Err(ClassifierError::InsufficientData(format!(
                "no {} training rows could be extracted",
                slot
            )));
        }
        let flat_len = flat.len();
        let x = Array2::from_shape_vec((samples, n_features), flat).map_err(|_| {
            ClassifierError::DimensionMismatch {
                expected: samples * n_features,
                actual: flat_len,
            }
        })?;
        span.record_training_set(dataset.len(), samples, n_features);

        let model = self.trainer.fit(x.view(), &labels, geometry)?;
        let metrics = MetricsCalculator::compute(&model, x.view(), &labels)?;
        let classes = model.classes().to_vec();
        span.record_result(classes.len(), metrics.accuracy);

        Ok(TrainingOutcome {
            slot,
            model: Arc::new(model),
            metrics,
            samples,
            classes,
        })
    }

    fn training_rows(&self, slot: ModelSlot, path: &Path) -> Result<Vec<Vec<f32>>> {
        tracing::debug!("Extracting {} features from {}", slot, path.display());
        match slot {
            ModelSlot::WholeImage => {
                let matrix = ImagePreprocessor::preprocess(path, self.whole_image_size)?;
                Ok(vec![ImagePreprocessor::flatten(&matrix)])
            }
            ModelSlot::Patch => {
                let matrix = ImagePreprocessor::preprocess(path, self.patch_grid_size)?;
                Ok(self
                    .patch_extractor
                    .extract(&matrix, UNLABELED)
                    .map(|patch| patch.values)
                    .collect())
            }
        }
    }

    /// Predict one label for an image
    pub fn classify<'a>(&self, input: impl Into<ImageInput<'a>>, slot: ModelSlot) -> Result<i32> {
        let input = input.into();
        let span = InferenceSpan::new("classify", slot);
        let _enter = span.span().enter();

        let label = match slot {
            ModelSlot::WholeImage => {
                let model = self.active_model(slot)?;
                let gray = ImagePreprocessor::load_gray(input)?;
                let matrix = ImagePreprocessor::to_matrix(&gray, self.whole_image_size);
                let features = ImagePreprocessor::flatten(&matrix);
                span.record_windows(1);
                model.predict(ArrayView1::from(features.as_slice()))?
            }
            ModelSlot::Patch => {
                let votes = self.patch_votes(input)?;
                span.record_windows(votes.values().sum());
                Self::majority_vote(&votes).ok_or_else(|| {
                    ClassifierError::InsufficientData("image yields no patches".to_string())
                })?
            }
        };

        span.record_label(label);
        Ok(label)
    }

    /// Per-class count of patch predictions over one image
    pub fn patch_votes<'a>(&self, input: impl Into<ImageInput<'a>>) -> Result<BTreeMap<i32, usize>> {
        let model = self.active_model(ModelSlot::Patch)?;
        let gray = ImagePreprocessor::load_gray(input.into())?;
        let grid = ImagePreprocessor::to_matrix(&gray, self.patch_grid_size);

        let context = LogContext::capture();
        let predictions = self
            .patch_extractor
            .extract(&grid, UNLABELED)
            .collect::<Vec<_>>()
            .par_iter()
            .map(|patch| context.scope(|| model.predict(patch.view())))
            .collect::<Result<Vec<i32>>>()?;

        let mut votes = BTreeMap::new();
        for label in predictions {
            *votes.entry(label).or_insert(0) += 1;
        }
        Ok(votes)
    }

    /// Most voted label, lowest label on ties
    pub fn majority_vote(votes: &BTreeMap<i32, usize>) -> Option<i32> {
        let mut best: Option<(i32, usize)> = None;
        for (&label, &count) in votes {
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((label, count)),
            }
        }
        best.map(|(label, _)| label)
    }

    /// Raw score map at patch-grid resolution
    pub fn heatmap_scores<'a>(&self, input: impl Into<ImageInput<'a>>, slot: ModelSlot) -> Result<Array2<f32>> {
        let span = InferenceSpan::new("heatmap", slot);
        let _enter = span.span().enter();

        let model = self.active_model(slot)?;
        let gray = ImagePreprocessor::load_gray(input.into())?;
        let grid = ImagePreprocessor::to_matrix(&gray, self.patch_grid_size);
        let extractor = self.extractor(slot);

        let windows: Vec<_> = extractor.extract(&grid, UNLABELED).collect();
        span.record_windows(windows.len());

        let score = self.score;
        let context = LogContext::capture();
        let scored = windows
            .par_iter()
            .map(|window| -> Result<((u32, u32), f32)> {
                let (label, margin) = context.scope(|| model.predict_with_score(window.view()))?;
                let value = match score {
                    HeatmapScore::Margin => margin,
                    HeatmapScore::Label => label as f32,
                };
                Ok((window.origin.unwrap_or((0, 0)), value))
            })
            .collect::<Result<Vec<_>>>()?;

        let (height, width) = grid.dim();
        Ok(paint_windows(height, width, extractor.patch_size(), scored))
    }
}

/// Paint square windows into a zero matrix in iteration order.
/// Overlapping pixels keep the value of the last window.
pub fn paint_windows<I>(height: usize, width: usize, window: usize, scores: I) -> Array2<f32>
where
    I: IntoIterator<Item = ((u32, u32), f32)>,
{
    let mut map = Array2::<f32>::zeros((height, width));
    for ((x, y), value) in scores {
        let (x, y) = (x as usize, y as usize);
        if x >= width || y >= height {
            continue;
        }
        let y_end = (y + window).min(height);
        let x_end = (x + window).min(width);
        map.slice_mut(s![y..y_end, x..x_end]).fill(value);
    }
    map
}
