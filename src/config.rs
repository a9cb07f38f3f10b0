// Settings file for the wake word pipeline
// One TOML document grouping every component's config; missing keys take defaults

use crate::audio::CaptureConfig;
use crate::features::FeatureConfig;
use crate::listening::{DetectionConfig, EngineConfig, VadConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors loading or validating settings
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("Failed to parse settings: {0}")]
    Parse(String),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Where the classifier model lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub path: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/wakeword.onnx"),
        }
    }
}

/// Event channel options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Publish an `energyUpdate` event for every chunk
    pub energy_updates: bool,
}

/// Complete settings document
///
/// ```toml
/// [audio]
/// device_name = "MacBook Pro Microphone"
///
/// [vad]
/// sensitivity = 1.5
///
/// [detection]
/// threshold = 0.6
/// cooldown_ms = 1000
///
/// [model]
/// path = "models/hey_cat.onnx"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: CaptureConfig,
    pub vad: VadConfig,
    pub features: FeatureConfig,
    pub detection: DetectionConfig,
    pub model: ModelSettings,
    pub events: EventSettings,
}

impl Settings {
    /// Read, parse and validate a settings file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let settings = Self::from_toml_str(&text)?;
        crate::info!("[config] Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vad
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.features
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let threshold = self.detection.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "detection threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.audio.chunk_samples == 0 {
            return Err(ConfigError::Invalid(
                "audio chunk_samples must be greater than 0".to_string(),
            ));
        }
        if self.model.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("model path is empty".to_string()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            vad: self.vad.clone(),
            features: self.features.clone(),
            detection: self.detection.clone(),
            emit_energy_events: self.events.energy_updates,
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
