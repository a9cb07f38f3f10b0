//! Centralized constants for the wake word pipeline.
//!
//! All audio-related magic numbers are defined here with documentation
//! explaining their purpose and constraints. Config structs build their
//! `Default` values from these.

// =============================================================================
// SAMPLE RATE AND CHUNKING
// =============================================================================

/// Sample rate used throughout the pipeline (Hz).
///
/// The classifier was trained on 16kHz mono audio; capture backends resample
/// to this rate when the device cannot deliver it natively.
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Duration of one audio chunk delivered by a sample source (milliseconds).
pub const CHUNK_DURATION_MS: u32 = 30;

/// Samples per chunk at 16kHz: 16000 * 30 / 1000 = 480.
pub const CHUNK_SAMPLES: usize = 480;

/// Divisor that maps signed 16-bit PCM onto [-1.0, 1.0).
pub const PCM16_NORMALIZER: f32 = 32768.0;

// =============================================================================
// SLIDING WINDOW
// =============================================================================

/// Duration of audio context handed to the feature extractor (seconds).
pub const WINDOW_SECS: f32 = 1.5;

/// Sliding window capacity at 16kHz: 1.5 * 16000 = 24000 samples (~94KB).
pub const WINDOW_SAMPLES: usize = 24000;

// =============================================================================
// FEATURE EXTRACTION
// =============================================================================

/// Analysis frame length for the STFT (samples, 32ms at 16kHz).
pub const FEATURE_FRAME_SIZE: usize = 512;

/// Hop between analysis frames (samples, 10ms at 16kHz).
pub const FEATURE_HOP_SIZE: usize = 160;

/// Number of mel bands in the feature matrix.
pub const MEL_BANDS: usize = 16;

/// Number of time frames in the feature matrix.
pub const FEATURE_FRAMES: usize = 96;

/// Floor added before log compression so silent bands map to -6 instead of -inf.
pub const LOG_FLOOR: f32 = 1e-6;

/// Pre-emphasis coefficient shared by the VAD and the feature extractor.
pub const PRE_EMPHASIS_COEFFICIENT: f32 = 0.97;

// =============================================================================
// VOICE ACTIVITY DETECTION
// =============================================================================

/// Base RMS energy threshold for speech.
///
/// Divided by the sensitivity multiplier; the adaptive noise floor can
/// raise the effective threshold above it.
pub const VAD_ENERGY_THRESHOLD: f32 = 0.01;

/// Duration of continuous silence before `on_silence_detected` fires (ms).
pub const VAD_SILENCE_TIMEOUT_MS: u64 = 2000;

/// Grace period after the last loud frame before speech counts as ended (ms).
///
/// Absorbs mid-word pauses and short dips in energy.
pub const VAD_HANGOVER_MS: u64 = 300;

/// Default sensitivity multiplier (1 = use the configured threshold as is).
pub const VAD_SENSITIVITY: f32 = 1.0;

/// Exponential smoothing rate for the background noise estimate.
pub const NOISE_UPDATE_RATE: f32 = 0.01;

/// Frames louder than this multiple of the noise floor do not update it.
pub const NOISE_GATE_RATIO: f32 = 1.5;

/// The adaptive threshold never drops below this multiple of the noise floor.
pub const NOISE_THRESHOLD_RATIO: f32 = 2.0;

/// Number of recent frame energies kept for the average energy statistic.
pub const ENERGY_HISTORY_LEN: usize = 10;

// =============================================================================
// DETECTION
// =============================================================================

/// Classifier confidence above which a wake word event fires (strict `>`).
pub const DETECTION_THRESHOLD: f32 = 0.5;

/// Minimum spacing between detections when debounce is enabled (ms).
///
/// Debounce is off by default; this is the spacing the mobile app used.
pub const SUGGESTED_DETECTION_COOLDOWN_MS: u64 = 1000;

/// Number of recent inference timings averaged in engine statistics.
pub const INFERENCE_TIMING_HISTORY: usize = 50;

// =============================================================================
// ENGINE CONCURRENCY
// =============================================================================

/// Chunks queued between the audio callback and the worker (~1s of audio).
///
/// When the worker falls this far behind, new chunks are dropped and counted.
pub const CHUNK_QUEUE_CAPACITY: usize = 32;

/// How long the worker blocks on the chunk queue before re-checking the stop flag (ms).
pub const WORKER_POLL_INTERVAL_MS: u64 = 100;

/// Maximum time `stop()` waits for the worker thread to exit (ms).
pub const WORKER_JOIN_TIMEOUT_MS: u64 = 500;

/// Event channel buffer size for listening events.
///
/// Bounded to handle backpressure if the receiver falls behind; energy
/// updates arrive every chunk so the buffer is sized for ~2s of them.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 64;

// =============================================================================
// CAPTURE
// =============================================================================

/// Chunk size for real-time audio resampling (samples).
///
/// When the audio device doesn't support 16kHz natively, we resample
/// in chunks of this size.
pub const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Maximum resampling backlog in samples (~3 seconds at 48kHz).
pub const MAX_RESAMPLE_BUFFER_SAMPLES: usize = 48000 * 3;

// =============================================================================
// UTILITY FUNCTIONS
// =============================================================================

/// Calculate chunk size for a given sample rate.
///
/// Returns the number of samples in one 30ms chunk at the given rate.
pub const fn chunk_size_for_sample_rate(sample_rate: u32) -> usize {
    (sample_rate * CHUNK_DURATION_MS / 1000) as usize
}

/// Number of samples covering `secs` seconds at `sample_rate`.
pub fn samples_for_duration(secs: f32, sample_rate: u32) -> usize {
    (secs * sample_rate as f32) as usize
}

#[cfg(test)]
#[path = "audio_constants_test.rs"]
mod tests;
