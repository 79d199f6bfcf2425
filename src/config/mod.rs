use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LoggingConfig;
use crate::model::ModelSlot;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub image: ImageConfig,
    pub patch: PatchConfig,
    pub dataset: DatasetConfig,
    pub svm: SvmConfig,
    pub heatmap: HeatmapConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Edge length the whole-image model is trained on
    pub whole_image_size: u32,
    /// Edge length used for patch extraction and heatmap resolution
    pub patch_grid_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub size: usize,
    pub stride: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub max_images_per_class: usize,
    /// Sort class directories and files by name before assigning labels
    pub sort_entries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmConfig {
    pub c: f32,
    /// Kept with the model for compatibility; the linear kernel ignores it
    pub gamma: f32,
    pub max_iter: usize,
    pub tolerance: f32,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatmapScore {
    /// Decision value of the winning class
    Margin,
    /// Predicted class label
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    pub alpha: f32,
    pub score: HeatmapScore,
    /// Blend the colour map over the source image
    pub overlay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub whole_model_key: String,
    pub patch_model_key: String,
    pub whole_metrics_key: String,
    pub patch_metrics_key: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            whole_image_size: 128,
            patch_grid_size: 256,
        }
    }
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            size: 64,
            stride: 32,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            max_images_per_class: 200,
            sort_entries: true,
        }
    }
}

impl Default for SvmConfig {
    fn default() -> Self {
        Self {
            c: 2.67,
            gamma: 5.383,
            max_iter: 1000,
            tolerance: 0.1,
            seed: 42,
        }
    }
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            score: HeatmapScore::Margin,
            overlay: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("svm-models"),
            whole_model_key: "svm_full_model.json".to_string(),
            patch_model_key: "svm_patch_model.json".to_string(),
            whole_metrics_key: "full_metrics.json".to_string(),
            patch_metrics_key: "patch_metrics.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn model_key(&self, slot: ModelSlot) -> &str {
        match slot {
            ModelSlot::WholeImage => &self.whole_model_key,
            ModelSlot::Patch => &self.patch_model_key,
        }
    }

    pub fn metrics_key(&self, slot: ModelSlot) -> &str {
        match slot {
            ModelSlot::WholeImage => &self.whole_metrics_key,
            ModelSlot::Patch => &self.patch_metrics_key,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<(), Box<dyn std::error::Error>> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.patch.stride == 0 {
            errors.push("Patch stride must be positive".to_string());
        }

        if self.patch.size <= self.patch.stride {
            errors.push("Patch size must be greater than the stride".to_string());
        }

        if self.patch.size > self.image.patch_grid_size as usize {
            errors.push("Patch size must fit inside the patch grid image".to_string());
        }

        if self.image.whole_image_size == 0 {
            errors.push("Whole-image size must be positive".to_string());
        }

        if self.image.whole_image_size as usize <= self.patch.stride {
            errors.push("Whole-image size must be greater than the patch stride".to_string());
        }

        if self.image.whole_image_size > self.image.patch_grid_size {
            errors.push("Whole-image size must not exceed the patch grid size".to_string());
        }

        if self.dataset.max_images_per_class == 0 {
            errors.push("max_images_per_class must be positive".to_string());
        }

        if self.svm.c <= 0.0 {
            errors.push("SVM C must be positive".to_string());
        }

        if self.svm.max_iter == 0 {
            errors.push("SVM max_iter must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.heatmap.alpha) {
            errors.push("Heatmap alpha must be within [0, 1]".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// Load `config_path`, falling back to defaults.
///
/// Problems are returned instead of logged so callers can report them once
/// their subscriber is installed.
pub fn load_config_with_warnings(config_path: Option<&str>) -> (Config, Vec<String>) {
    let Some(path) = config_path else {
        return (Config::default(), Vec::new());
    };
    match Config::load_from_file(path) {
        Ok(config) => match config.validate() {
            Ok(()) => (config, Vec::new()),
            Err(errors) => {
                let mut warnings = vec![format!("Configuration '{}' failed validation:", path)];
                warnings.extend(errors.into_iter().map(|error| format!("  - {}", error)));
                warnings.push("Using default configuration instead.".to_string());
                (Config::default(), warnings)
            }
        },
        Err(e) => (
            Config::default(),
            vec![
                format!("Failed to load config from '{}': {}", path, e),
                "Using default configuration.".to_string(),
            ],
        ),
    }
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    let (config, warnings) = load_config_with_warnings(config_path);
    for warning in warnings {
        tracing::warn!("{}", warning);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.patch.size, 64);
        assert_eq!(config.patch.stride, 32);
        assert_eq!(config.image.whole_image_size, 128);
        assert_eq!(config.image.patch_grid_size, 256);
    }

    #[test]
    fn test_patch_not_larger_than_stride_is_rejected() {
        let mut config = Config::default();
        config.patch.size = 32;
        config.patch.stride = 32;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("greater than the stride")));
    }

    #[test]
    fn test_toml_and_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.svm.c = 1.5;
        config.heatmap.score = HeatmapScore::Label;

        let toml_path = dir.path().join("medscan.toml");
        config.save_to_file(&toml_path, ConfigFormat::Toml).unwrap();
        let loaded = Config::load_from_file(&toml_path).unwrap();
        assert_eq!(loaded.svm.c, 1.5);
        assert_eq!(loaded.heatmap.score, HeatmapScore::Label);

        let json_path = dir.path().join("medscan.json");
        config.save_to_file(&json_path, ConfigFormat::Json).unwrap();
        let loaded = Config::load_from_file(&json_path).unwrap();
        assert_eq!(loaded.storage.patch_model_key, "svm_patch_model.json");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[patch]\nsize = 32\nstride = 16\n").unwrap();
        assert_eq!(config.patch.size, 32);
        assert_eq!(config.patch.stride, 16);
        assert_eq!(config.dataset.max_images_per_class, 200);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = load_config_or_default(Some("/no/such/medscan.toml"));
        assert_eq!(config.patch.size, 64);
    }

    #[test]
    fn test_fallback_reasons_are_returned() {
        let (config, warnings) = load_config_with_warnings(Some("/no/such/medscan.toml"));
        assert_eq!(config.patch.size, 64);
        assert!(warnings[0].contains("/no/such/medscan.toml"));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        let mut bad = Config::default();
        bad.patch.stride = 0;
        bad.save_to_file(&path, ConfigFormat::Toml).unwrap();
        let (config, warnings) = load_config_with_warnings(path.to_str());
        assert_eq!(config.patch.stride, Config::default().patch.stride);
        assert!(warnings.len() >= 3);
        assert!(warnings.last().unwrap().contains("default"));

        let (_, warnings) = load_config_with_warnings(None);
        assert!(warnings.is_empty());
    }
}
