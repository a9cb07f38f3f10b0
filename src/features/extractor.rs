// Log-mel spectrogram extraction for the wake word classifier

use super::mel::MelFilterBank;
use super::preemphasis::PreEmphasisFilter;
use super::FeatureError;
use crate::audio_constants::{
    DEFAULT_SAMPLE_RATE, FEATURE_FRAMES, FEATURE_FRAME_SIZE, FEATURE_HOP_SIZE, LOG_FLOOR,
    MEL_BANDS, PRE_EMPHASIS_COEFFICIENT,
};
use ndarray::Array3;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

/// Spectrogram geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    /// STFT frame length in samples
    pub frame_size: usize,
    /// Samples between frame starts
    pub hop_size: usize,
    pub mel_bands: usize,
    /// Frames in the output matrix
    pub frames: usize,
    pub pre_emphasis: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: FEATURE_FRAME_SIZE,
            hop_size: FEATURE_HOP_SIZE,
            mel_bands: MEL_BANDS,
            frames: FEATURE_FRAMES,
            pre_emphasis: PRE_EMPHASIS_COEFFICIENT,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), FeatureError> {
        let invalid = |msg: &str| Err(FeatureError::ConfigurationInvalid(msg.to_string()));
        if self.sample_rate == 0 {
            return invalid("sample_rate must be positive");
        }
        if self.frame_size < 2 {
            return invalid("frame_size must be at least 2");
        }
        if self.hop_size == 0 {
            return invalid("hop_size must be positive");
        }
        if self.mel_bands == 0 {
            return invalid("mel_bands must be positive");
        }
        if self.frames == 0 {
            return invalid("frames must be positive");
        }
        if !self.pre_emphasis.is_finite() {
            return invalid("pre_emphasis must be finite");
        }
        Ok(())
    }

    /// Samples needed to fill every frame of the matrix
    pub fn samples_for_all_frames(&self) -> usize {
        (self.frames - 1) * self.hop_size + self.frame_size
    }
}

/// Band-major matrix of log-mel energies
///
/// Band `m`, frame `f` lives at index `m * frames + f`. Frames the input
/// window was too short to fill hold 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    bands: usize,
    frames: usize,
    data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn zeros(bands: usize, frames: usize) -> Self {
        Self {
            bands,
            frames,
            data: vec![0.0; bands * frames],
        }
    }

    pub fn get(&self, band: usize, frame: usize) -> f32 {
        self.data[band * self.frames + frame]
    }

    fn set(&mut self, band: usize, frame: usize, value: f32) {
        self.data[band * self.frames + frame] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Classifier input tensor of shape `(1, bands, frames)`
    pub fn to_input_array(&self) -> Result<Array3<f32>, ndarray::ShapeError> {
        Array3::from_shape_vec((1, self.bands, self.frames), self.data.clone())
    }
}

/// Converts an audio window into a [`FeatureMatrix`]
///
/// Holds only immutable precomputed tables (FFT plan, Hann window, mel
/// filterbank), so `extract` is a pure function of its input.
pub struct FeatureExtractor {
    config: FeatureConfig,
    filter_bank: Arc<MelFilterBank>,
    hann_window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self, FeatureError> {
        config.validate()?;

        let filter_bank =
            MelFilterBank::cached(config.sample_rate, config.frame_size, config.mel_bands);
        let hann_window = hann_window(config.frame_size);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.frame_size);

        Ok(Self {
            config,
            filter_bank,
            hann_window,
            fft,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Compute the log-mel spectrogram of `window`
    ///
    /// Frames start at sample 0 and advance by the hop size; a frame that
    /// would run past the end of the window is not computed.
    pub fn extract(&self, window: &[f32]) -> FeatureMatrix {
        let frame_size = self.config.frame_size;
        let hop_size = self.config.hop_size;
        let mut matrix = FeatureMatrix::zeros(self.config.mel_bands, self.config.frames);

        // Fresh filter memory per call keeps extraction reproducible
        let emphasized = PreEmphasisFilter::new(self.config.pre_emphasis).apply(window);

        let available = if emphasized.len() >= frame_size {
            (emphasized.len() - frame_size) / hop_size + 1
        } else {
            0
        };
        let frame_count = available.min(self.config.frames);

        let mut spectrum = vec![Complex32::new(0.0, 0.0); frame_size];
        let mut scratch = vec![Complex32::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];
        let mut magnitudes = vec![0.0f32; self.filter_bank.bin_count()];
        let mut band_energies = vec![0.0f32; self.config.mel_bands];

        for frame in 0..frame_count {
            let start = frame * hop_size;
            let samples = &emphasized[start..start + frame_size];

            for ((slot, &sample), &w) in spectrum.iter_mut().zip(samples).zip(&self.hann_window) {
                *slot = Complex32::new(sample * w, 0.0);
            }
            self.fft.process_with_scratch(&mut spectrum, &mut scratch);

            for (mag, bin) in magnitudes.iter_mut().zip(&spectrum) {
                *mag = bin.norm();
            }

            self.filter_bank.apply(&magnitudes, &mut band_energies);
            for (band, &energy) in band_energies.iter().enumerate() {
                matrix.set(band, frame, (energy + LOG_FLOOR).log10());
            }
        }

        crate::trace!(
            "[features] Extracted {}/{} frames from {} samples",
            frame_count,
            self.config.frames,
            window.len()
        );
        matrix
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Symmetric Hann window `0.5 * (1 - cos(2πn / (N - 1)))`
fn hann_window(size: usize) -> Vec<f32> {
    let denom = (size - 1) as f32;
    (0..size)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / denom).cos()))
        .collect()
}
