// Spectral feature extraction: pre-emphasis, mel filterbank, log-mel spectrogram

pub mod extractor;
pub mod mel;
pub mod preemphasis;

pub use extractor::{FeatureConfig, FeatureExtractor, FeatureMatrix};
pub use mel::MelFilterBank;
pub use preemphasis::PreEmphasisFilter;

/// Errors raised while building a feature extractor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("Invalid feature configuration: {0}")]
    ConfigurationInvalid(String),
}
