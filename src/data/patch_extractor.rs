use ndarray::{s, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::config::PatchConfig;
use crate::error::{ClassifierError, Result};

/// Label carried by feature vectors that are only used for inference
pub const UNLABELED: i32 = -1;

/// Sliding-window constants a model was trained with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelGeometry {
    pub window: usize,
    pub stride: usize,
}

impl ModelGeometry {
    pub fn feature_len(&self) -> usize {
        self.window * self.window
    }
}

/// Flattened pixel intensities of a whole image or of one patch
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub values: Vec<f32>,
    pub label: i32,
    /// Top-left `(x, y)` of the patch in the source image
    pub origin: Option<(u32, u32)>,
}

impl FeatureVector {
    pub fn whole(values: Vec<f32>, label: i32) -> Self {
        Self {
            values,
            label,
            origin: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(self.values.as_slice())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PatchExtractor {
    patch_size: usize,
    stride: usize,
}

impl PatchExtractor {
    /// Overlapping windows only: the patch must be strictly larger than the stride
    pub fn new(patch_size: usize, stride: usize) -> Result<Self> {
        if stride == 0 || patch_size <= stride {
            return Err(ClassifierError::InvalidConfig(format!(
                "patch size {} must be greater than stride {} (> 0)",
                patch_size, stride
            )));
        }
        Ok(Self { patch_size, stride })
    }

    pub fn from_config(config: &PatchConfig) -> Result<Self> {
        Self::new(config.size, config.stride)
    }

    pub fn with_geometry(geometry: ModelGeometry) -> Result<Self> {
        Self::new(geometry.window, geometry.stride)
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn geometry(&self) -> ModelGeometry {
        ModelGeometry {
            window: self.patch_size,
            stride: self.stride,
        }
    }

    pub fn feature_len(&self) -> usize {
        self.patch_size * self.patch_size
    }

    fn steps(&self, extent: usize) -> usize {
        if extent < self.patch_size {
            0
        } else {
            (extent - self.patch_size) / self.stride + 1
        }
    }

    /// Number of full windows that fit into a `height`×`width` image
    pub fn patch_count(&self, height: usize, width: usize) -> usize {
        self.steps(height) * self.steps(width)
    }

    /// Lazily walk the image row-major from (0, 0). The sequence order is the
    /// spatial order heatmap painting relies on.
    pub fn extract<'a>(&self, image: &'a Array2<f32>, label: i32) -> Patches<'a> {
        let (height, width) = image.dim();
        Patches {
            image: image.view(),
            patch_size: self.patch_size,
            stride: self.stride,
            label,
            rows: self.steps(height),
            cols: self.steps(width),
            next: 0,
        }
    }
}

/// Restartable (`Clone`) iterator over the patches of one image
#[derive(Debug, Clone)]
pub struct Patches<'a> {
    image: ArrayView2<'a, f32>,
    patch_size: usize,
    stride: usize,
    label: i32,
    rows: usize,
    cols: usize,
    next: usize,
}

impl Patches<'_> {
    fn total(&self) -> usize {
        self.rows * self.cols
    }
}

impl Iterator for Patches<'_> {
    type Item = FeatureVector;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total() {
            return None;
        }
        let y = (self.next / self.cols) * self.stride;
        let x = (self.next % self.cols) * self.stride;
        self.next += 1;

        let window = self
            .image
            .slice(s![y..y + self.patch_size, x..x + self.patch_size]);
        Some(FeatureVector {
            values: window.iter().copied().collect(),
            label: self.label,
            origin: Some((x as u32, y as u32)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Patches<'_> {}
