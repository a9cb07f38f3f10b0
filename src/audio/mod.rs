// Audio input for the wake word pipeline
// Sample sources deliver fixed 30ms chunks of normalized mono samples

use crate::audio_constants::{CHUNK_SAMPLES, DEFAULT_SAMPLE_RATE, PCM16_NORMALIZER};
use serde::{Deserialize, Serialize};

mod cpal_backend;
pub use cpal_backend::{CpalBackend, CpalSource};

mod device;
pub use device::{list_input_devices, AudioInputDevice};

pub mod thread;
pub use thread::{AudioThreadError, AudioThreadHandle};

pub mod wav;
pub use wav::{read_wav_file, write_wav_pcm16, WavEncodingError, WavFileSource};

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

/// Convert one signed 16-bit PCM sample to a float in [-1.0, 1.0)
pub fn pcm16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_NORMALIZER
}

/// One block of normalized mono samples with its arrival time
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Arrival time in milliseconds
    pub timestamp_ms: u64,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, timestamp_ms: u64) -> Self {
        Self {
            samples,
            timestamp_ms,
        }
    }

    /// Build a chunk from signed 16-bit PCM, normalizing by 32768
    pub fn from_pcm16(pcm: &[i16], timestamp_ms: u64) -> Self {
        Self::new(pcm.iter().map(|&s| pcm16_to_f32(s)).collect(), timestamp_ms)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by this chunk at `sample_rate`
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        if sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / sample_rate as u64
    }
}

/// Regroups arbitrarily sized sample runs into fixed-size chunks
///
/// Device callbacks deliver whatever block size the driver picks; the
/// pipeline wants exact 480-sample (30ms) chunks. Leftover samples are
/// held until the next push.
#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_samples: usize,
    pending: Vec<f32>,
}

impl ChunkAssembler {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunk_samples: chunk_samples.max(1),
            pending: Vec::with_capacity(chunk_samples * 2),
        }
    }

    /// Append samples, calling `emit` once per completed chunk
    pub fn push(&mut self, samples: &[f32], timestamp_ms: u64, mut emit: impl FnMut(AudioChunk)) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.chunk_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_samples).collect();
            emit(AudioChunk::new(chunk, timestamp_ms));
        }
    }

    /// Samples waiting for a full chunk
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Emit the remainder as a short final chunk, if any
    pub fn flush(&mut self, timestamp_ms: u64) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }
        Some(AudioChunk::new(std::mem::take(&mut self.pending), timestamp_ms))
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new(CHUNK_SAMPLES)
    }
}

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Receives chunks from a sample source, on the source's thread
pub type ChunkSink = Box<dyn FnMut(AudioChunk) + Send>;

/// Something that produces audio chunks asynchronously
///
/// `open` returns once the stream is running; chunks then arrive on the
/// sink in order until `close`. Implementations must stop calling the
/// sink before `close` returns.
pub trait SampleSource: Send {
    fn open(&mut self, sink: ChunkSink) -> Result<(), AudioCaptureError>;

    fn close(&mut self) -> Result<(), AudioCaptureError>;

    fn is_open(&self) -> bool;

    /// Sample rate of delivered chunks
    fn sample_rate(&self) -> u32 {
        DEFAULT_SAMPLE_RATE
    }

    /// True if chunk timestamps track the position in the audio rather
    /// than the wall clock, as when a file is replayed unpaced
    fn timestamps_follow_media(&self) -> bool {
        false
    }
}

/// Capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; `None` uses the system default
    pub device_name: Option<String>,
    /// Samples per delivered chunk
    pub chunk_samples: usize,
    /// Pace WAV replay at real time instead of as fast as possible
    pub realtime_replay: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            chunk_samples: CHUNK_SAMPLES,
            realtime_replay: true,
        }
    }
}

/// Errors that can occur during audio capture
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioCaptureError {
    /// The OS refused microphone access
    #[error("Microphone permission denied")]
    PermissionDenied,
    /// No audio input device is available
    #[error("No audio input device available")]
    NoDeviceAvailable,
    /// Error with the audio device or input file
    #[error("Audio device error: {0}")]
    DeviceError(String),
    /// Error with the audio stream
    #[error("Audio stream error: {0}")]
    StreamError(String),
    /// Sample format or rate the pipeline cannot consume
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}
