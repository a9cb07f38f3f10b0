// cpal-based microphone capture
// This code interacts with hardware and is excluded from coverage measurement
//
// Note: All impl blocks here are excluded from coverage because they
// interact with hardware and cannot be unit tested.
#![cfg_attr(coverage_nightly, coverage(off))]

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use rubato::{FftFixedIn, Resampler};

use super::thread::AudioThreadHandle;
use super::{
    downmix_to_mono, AudioCaptureError, ChunkAssembler, ChunkSink, SampleSource,
};
use crate::audio_constants::{
    DEFAULT_SAMPLE_RATE, MAX_RESAMPLE_BUFFER_SAMPLES, RESAMPLE_CHUNK_SIZE,
};
use crate::listening::clock::{Clock, SystemClock};
use crate::{debug, error, info, warn};

/// Owns one cpal input stream; must live on the thread that created it
pub struct CpalBackend {
    stream: Option<Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self { stream: None }
    }

    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the input device and stream 16kHz mono chunks into `sink`
    ///
    /// Falls back to the default device when `device_name` is not found.
    /// Returns the native device sample rate.
    pub fn start(
        &mut self,
        sink: ChunkSink,
        device_name: Option<String>,
        chunk_samples: usize,
    ) -> Result<u32, AudioCaptureError> {
        info!("[cpal] Starting capture (target: {}Hz)...", DEFAULT_SAMPLE_RATE);
        self.stop();

        let host = cpal::default_host();
        debug!("[cpal] Host: {:?}", host.id());

        let device = match device_name.as_deref() {
            Some(name) => match find_device_by_name(name) {
                Some(d) => {
                    info!("[cpal] Using requested device: {}", name);
                    d
                }
                None => {
                    warn!("[cpal] Requested device '{}' not found, falling back to default", name);
                    default_device(&host)?
                }
            },
            None => default_device(&host)?,
        };
        debug!(
            "[cpal] Input device: {:?}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let (config, needs_resampling) =
            if let Some(config_16k) = find_config_with_sample_rate(&device, DEFAULT_SAMPLE_RATE) {
                info!("[cpal] Device supports {}Hz natively", DEFAULT_SAMPLE_RATE);
                (config_16k, false)
            } else {
                let default_config = device.default_input_config().map_err(|e| {
                    error!("[cpal] Failed to get input config: {}", e);
                    map_config_error(e)
                })?;
                warn!(
                    "[cpal] Device doesn't support {}Hz, will resample from {}Hz",
                    DEFAULT_SAMPLE_RATE,
                    default_config.sample_rate().0
                );
                (default_config, true)
            };

        let device_sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        debug!(
            "[cpal] Config: {} Hz, {:?}, {} channels",
            device_sample_rate,
            config.sample_format(),
            channels
        );

        let resampler = if needs_resampling {
            Some(create_resampler(device_sample_rate, DEFAULT_SAMPLE_RATE, RESAMPLE_CHUNK_SIZE)?)
        } else {
            None
        };

        let mut state = CallbackState {
            sink,
            channels,
            resampler,
            resample_buffer: Vec::new(),
            assembler: ChunkAssembler::new(chunk_samples),
            clock: SystemClock,
        };

        let err_fn = |err: cpal::StreamError| {
            error!("[cpal] Audio stream error: {}", err);
        };

        // Each callback converts to f32 and delegates to CallbackState::process_samples
        let stream_config: cpal::StreamConfig = config.clone().into();
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    state.process_samples(data);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<f32> =
                        data.iter().map(|&s| super::pcm16_to_f32(s)).collect();
                    state.process_samples(&converted);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
                        .collect();
                    state.process_samples(&converted);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(AudioCaptureError::UnsupportedFormat(format!(
                    "sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| {
            error!("[cpal] Failed to build input stream: {}", e);
            map_build_error(e)
        })?;

        stream.play().map_err(|e| {
            error!("[cpal] Failed to start stream: {}", e);
            AudioCaptureError::StreamError(e.to_string())
        })?;

        info!(
            "[cpal] Stream started at {}Hz (output: {}Hz)",
            device_sample_rate, DEFAULT_SAMPLE_RATE
        );
        self.stream = Some(stream);
        Ok(device_sample_rate)
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Dropping the stream stops the callback
            drop(stream);
            debug!("[cpal] Audio stream stopped");
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// State moved into the cpal data callback
struct CallbackState {
    sink: ChunkSink,
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    resample_buffer: Vec<f32>,
    assembler: ChunkAssembler,
    clock: SystemClock,
}

impl CallbackState {
    fn process_samples(&mut self, interleaved: &[f32]) {
        let mono = downmix_to_mono(interleaved, self.channels);

        let samples = match self.resampler.as_mut() {
            Some(resampler) => {
                if self.resample_buffer.len() + mono.len() > MAX_RESAMPLE_BUFFER_SAMPLES {
                    // Resampler can't keep up; drop the backlog rather than grow without bound
                    warn!("[cpal] Resample buffer overflow, dropping {} samples", self.resample_buffer.len());
                    self.resample_buffer.clear();
                }
                self.resample_buffer.extend_from_slice(&mono);

                let chunk_size = resampler.input_frames_next();
                let mut resampled = Vec::new();
                while self.resample_buffer.len() >= chunk_size {
                    let block: Vec<f32> = self.resample_buffer.drain(..chunk_size).collect();
                    match resampler.process(&[block], None) {
                        Ok(output) => {
                            if let Some(channel) = output.first() {
                                resampled.extend_from_slice(channel);
                            }
                        }
                        Err(e) => error!("[cpal] Resampling failed: {}", e),
                    }
                }
                resampled
            }
            None => mono,
        };

        let now = self.clock.now_ms();
        let sink = &mut self.sink;
        self.assembler.push(&samples, now, |chunk| sink(chunk));
    }
}

fn default_device(host: &cpal::Host) -> Result<cpal::Device, AudioCaptureError> {
    host.default_input_device().ok_or_else(|| {
        error!("[cpal] No input device available!");
        AudioCaptureError::NoDeviceAvailable
    })
}

/// Find an audio input device by name
fn find_device_by_name(name: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    host.input_devices()
        .ok()?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

/// Try to find a supported config with the target sample rate
fn find_config_with_sample_rate(
    device: &cpal::Device,
    target_rate: u32,
) -> Option<cpal::SupportedStreamConfig> {
    if let Ok(configs) = device.supported_input_configs() {
        for config_range in configs {
            let min_rate = config_range.min_sample_rate().0;
            let max_rate = config_range.max_sample_rate().0;
            if min_rate <= target_rate && target_rate <= max_rate {
                return Some(config_range.with_sample_rate(SampleRate(target_rate)));
            }
        }
    }
    None
}

/// Create a resampler for converting from source rate to target rate
fn create_resampler(
    source_rate: u32,
    target_rate: u32,
    chunk_size: usize,
) -> Result<FftFixedIn<f32>, AudioCaptureError> {
    FftFixedIn::new(
        source_rate as usize,
        target_rate as usize,
        chunk_size,
        1, // sub_chunks
        1, // channels - mono after downmix
    )
    .map_err(|e| AudioCaptureError::DeviceError(format!("Failed to create resampler: {}", e)))
}

fn looks_like_permission_error(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("permission") || lower.contains("not authorized") || lower.contains("access denied")
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioCaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioCaptureError::NoDeviceAvailable,
        cpal::BuildStreamError::StreamConfigNotSupported => {
            AudioCaptureError::UnsupportedFormat("stream config not supported".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err }
            if looks_like_permission_error(&err.description) =>
        {
            AudioCaptureError::PermissionDenied
        }
        other => AudioCaptureError::StreamError(other.to_string()),
    }
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> AudioCaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => AudioCaptureError::NoDeviceAvailable,
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            AudioCaptureError::UnsupportedFormat("input stream type not supported".to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err }
            if looks_like_permission_error(&err.description) =>
        {
            AudioCaptureError::PermissionDenied
        }
        other => AudioCaptureError::DeviceError(other.to_string()),
    }
}

/// Microphone [`SampleSource`] backed by cpal on a dedicated audio thread
///
/// cpal streams are not `Send`, so the stream lives on the audio thread and
/// this handle talks to it over a command channel.
pub struct CpalSource {
    device_name: Option<String>,
    chunk_samples: usize,
    thread: Option<AudioThreadHandle>,
    open: bool,
}

impl CpalSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self::with_chunk_size(device_name, crate::audio_constants::CHUNK_SAMPLES)
    }

    pub fn with_chunk_size(device_name: Option<String>, chunk_samples: usize) -> Self {
        Self {
            device_name,
            chunk_samples,
            thread: None,
            open: false,
        }
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }
}

impl SampleSource for CpalSource {
    fn open(&mut self, sink: ChunkSink) -> Result<(), AudioCaptureError> {
        let handle = self.thread.get_or_insert_with(AudioThreadHandle::spawn);
        let device_rate = handle
            .start(sink, self.device_name.clone(), self.chunk_samples)
            .map_err(AudioCaptureError::from)?;
        debug!("[cpal] Source open, device rate {}Hz", device_rate);
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), AudioCaptureError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if let Some(handle) = self.thread.as_ref() {
            handle.stop().map_err(AudioCaptureError::from)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
