//! Logging configuration
//!
//! Per-component log levels and output destinations for the classification engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Level for dataset loading and SVM training
    pub training_level: String,

    /// Level for classification and heatmap generation
    pub inference_level: String,

    /// Level for model/metrics storage
    pub storage_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            training_level: "info".to_string(),
            inference_level: "info".to_string(),
            storage_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose configuration for local development
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            training_level: "debug".to_string(),
            inference_level: "trace".to_string(),
            storage_level: "debug".to_string(),
        }
    }

    /// Minimal overhead configuration for deployments
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/medscan")),
            include_file_location: false,
            training_level: "info".to_string(),
            inference_level: "warn".to_string(),
            storage_level: "info".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("training_level", &self.training_level),
            ("inference_level", &self.inference_level),
            ("storage_level", &self.storage_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// Effective log level for a component target
    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "training" | "data" | "model" => &self.training_level,
            "inference" | "service" | "visualization" => &self.inference_level,
            "storage" => &self.storage_level,
            _ => &self.global_level,
        }
    }
}
