use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DatasetConfig;
use crate::error::{ClassifierError, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Labelled file references; pixels are decoded later by the trainer
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub images: Vec<PathBuf>,
    pub labels: Vec<i32>,
    pub class_map: BTreeMap<String, i32>,
}

impl Dataset {
    pub fn new(images: Vec<PathBuf>, labels: Vec<i32>, class_map: BTreeMap<String, i32>) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(ClassifierError::LengthMismatch {
                features: images.len(),
                labels: labels.len(),
            });
        }
        if let Some(&label) = labels
            .iter()
            .find(|label| !class_map.values().any(|v| v == *label))
        {
            return Err(ClassifierError::InvalidLabel(label));
        }
        Ok(Self {
            images,
            labels,
            class_map,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_map.len()
    }

    pub fn class_name(&self, label: i32) -> Option<&str> {
        self.class_map
            .iter()
            .find(|(_, v)| **v == label)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, i32)> {
        self.images
            .iter()
            .map(PathBuf::as_path)
            .zip(self.labels.iter().copied())
    }
}

#[derive(Debug, Clone)]
pub struct DatasetLoader {
    max_images_per_class: usize,
    sort_entries: bool,
}

impl Default for DatasetLoader {
    fn default() -> Self {
        Self::from_config(&DatasetConfig::default())
    }
}

impl DatasetLoader {
    pub fn new(max_images_per_class: usize, sort_entries: bool) -> Self {
        Self {
            max_images_per_class,
            sort_entries,
        }
    }

    pub fn from_config(config: &DatasetConfig) -> Self {
        Self::new(config.max_images_per_class, config.sort_entries)
    }

    /// Scan `root`, treating each immediate subdirectory as one class
    pub fn load<P: AsRef<Path>>(&self, root: P) -> Result<Dataset> {
        let root = root.as_ref();
        let invalid = || ClassifierError::InvalidDatasetPath {
            path: root.to_path_buf(),
        };
        if !root.is_dir() {
            return Err(invalid());
        }

        let class_dirs = self.list(root, |p| p.is_dir()).map_err(|_| invalid())?;
        if class_dirs.is_empty() {
            return Err(invalid());
        }

        let mut class_map = BTreeMap::new();
        let mut images = Vec::new();
        let mut labels = Vec::new();

        for (label, class_dir) in class_dirs.iter().enumerate() {
            let label = label as i32;
            let class_name = class_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            class_map.insert(class_name.clone(), label);

            let files = self
                .list(class_dir, |p| p.is_file() && has_image_extension(p))
                .map_err(|_| invalid())?;
            let added = files.len().min(self.max_images_per_class);
            for file in files.into_iter().take(self.max_images_per_class) {
                images.push(file);
                labels.push(label);
            }

            tracing::info!("Loaded {} images for class '{}'", added, class_name);
        }

        tracing::info!("Total loaded images: {}", images.len());
        tracing::info!("Class mapping: {:?}", class_map);

        Dataset::new(images, labels, class_map)
    }

    fn list(&self, dir: &Path, keep: impl Fn(&Path) -> bool) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if keep(&path) {
                entries.push(path);
            }
        }
        if self.sort_entries {
            entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        }
        Ok(entries)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
