// Always-listening wake word detection
// VAD gating, log-mel features and classifier confirmation over a 1.5s sliding window

// Enable coverage attribute on nightly for explicit exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod audio;
pub mod audio_constants;
pub mod config;
pub mod features;
pub mod listening;

// Re-export log macros for use throughout the crate
pub use log::{debug, error, info, trace, warn};

pub use audio::{AudioCaptureError, AudioChunk, CpalSource, SampleSource, WavFileSource};
pub use config::{ConfigError, Settings};
pub use features::{FeatureConfig, FeatureExtractor, FeatureMatrix, MelFilterBank};
pub use listening::{
    DetectionConfig, EngineConfig, EngineError, EngineState, EngineStats, ListeningEvent,
    OnnxModelLoader, SlidingAudioBuffer, VadConfig, VoiceActivityDetector, WakeWordClassifier,
    WakeWordEngine,
};
