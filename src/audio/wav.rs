// WAV file input and output
// Replays 16kHz recordings through the pipeline and writes fixtures for tests

use super::{downmix_to_mono, pcm16_to_f32, AudioCaptureError, AudioChunk, ChunkSink, SampleSource};
use crate::audio_constants::{CHUNK_SAMPLES, DEFAULT_SAMPLE_RATE};
use crate::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Errors that can occur during WAV encoding
#[derive(Debug, Clone, PartialEq)]
pub enum WavEncodingError {
    /// Error during WAV encoding or file creation
    EncodingError(String),
    /// Invalid input (empty samples, NaN/infinity values)
    InvalidInput(String),
}

impl std::fmt::Display for WavEncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WavEncodingError::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            WavEncodingError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for WavEncodingError {}

fn hound_error(e: hound::Error) -> WavEncodingError {
    WavEncodingError::EncodingError(e.to_string())
}

/// Write mono samples in [-1.0, 1.0] as a 16-bit PCM WAV file
///
/// Out-of-range samples are clamped.
pub fn write_wav_pcm16(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), WavEncodingError> {
    if samples.is_empty() {
        return Err(WavEncodingError::InvalidInput(
            "Cannot encode empty samples".to_string(),
        ));
    }
    if samples.iter().any(|s| !s.is_finite()) {
        return Err(WavEncodingError::InvalidInput(
            "Samples contain NaN or infinity values".to_string(),
        ));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(hound_error)?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer
            .write_sample((clamped * i16::MAX as f32) as i16)
            .map_err(hound_error)?;
    }
    writer.finalize().map_err(hound_error)?;
    debug!("[wav] Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Read a WAV file as normalized mono samples
///
/// Accepts 16-bit integer or 32-bit float files at 16kHz; multi-channel
/// files are down-mixed. Returns the samples and the file's sample rate.
pub fn read_wav_file(path: &Path) -> Result<(Vec<f32>, u32), AudioCaptureError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| AudioCaptureError::DeviceError(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();

    if spec.sample_rate != DEFAULT_SAMPLE_RATE {
        return Err(AudioCaptureError::UnsupportedFormat(format!(
            "{}Hz (expected {}Hz)",
            spec.sample_rate, DEFAULT_SAMPLE_RATE
        )));
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(pcm16_to_f32))
            .collect::<Result<_, _>>(),
        (hound::SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>(),
        (format, bits) => {
            return Err(AudioCaptureError::UnsupportedFormat(format!(
                "{}-bit {:?}",
                bits, format
            )))
        }
    }
    .map_err(|e| AudioCaptureError::StreamError(e.to_string()))?;

    let samples = downmix_to_mono(&interleaved, spec.channels as usize);
    info!(
        "[wav] Loaded {} ({} samples, {} channels)",
        path.display(),
        samples.len(),
        spec.channels
    );
    Ok((samples, spec.sample_rate))
}

/// [`SampleSource`] that replays a WAV file on a worker thread
///
/// Chunk timestamps follow the file position, so replay is deterministic
/// whether or not it is paced at real time.
pub struct WavFileSource {
    path: PathBuf,
    realtime: bool,
    chunk_samples: usize,
    should_stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>, realtime: bool) -> Self {
        Self {
            path: path.into(),
            realtime,
            chunk_samples: CHUNK_SAMPLES,
            should_stop: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_samples: usize) -> Self {
        self.chunk_samples = chunk_samples.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set once the last chunk of the file has been delivered
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }
}

impl SampleSource for WavFileSource {
    fn open(&mut self, mut sink: ChunkSink) -> Result<(), AudioCaptureError> {
        self.close()?;
        let (samples, sample_rate) = read_wav_file(&self.path)?;

        self.should_stop.store(false, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        let should_stop = self.should_stop.clone();
        let finished = self.finished.clone();
        let realtime = self.realtime;
        let chunk_samples = self.chunk_samples;

        let worker = thread::spawn(move || {
            let started = Instant::now();
            let mut position = 0usize;
            for block in samples.chunks(chunk_samples) {
                if should_stop.load(Ordering::SeqCst) {
                    debug!("[wav] Replay stopped at sample {}", position);
                    return;
                }
                let timestamp_ms = position as u64 * 1000 / sample_rate as u64;
                if realtime {
                    let due = Duration::from_millis(timestamp_ms);
                    let elapsed = started.elapsed();
                    if due > elapsed {
                        thread::sleep(due - elapsed);
                    }
                }
                sink(AudioChunk::new(block.to_vec(), timestamp_ms));
                position += block.len();
            }
            finished.store(true, Ordering::SeqCst);
            debug!("[wav] Replay finished after {} samples", position);
        });

        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioCaptureError> {
        if let Some(worker) = self.worker.take() {
            self.should_stop.store(true, Ordering::SeqCst);
            if worker.join().is_err() {
                warn!("[wav] Replay thread panicked");
                return Err(AudioCaptureError::StreamError(
                    "WAV replay thread panicked".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    fn timestamps_follow_media(&self) -> bool {
        true
    }
}

impl Drop for WavFileSource {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
#[path = "wav_test.rs"]
mod tests;
