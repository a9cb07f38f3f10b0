// Energy-based voice activity detection
// RMS energy over pre-emphasized frames, compared against an adaptive noise floor,
// with a hangover/silence-timeout state machine for speech boundaries

use super::clock::{Clock, SystemClock};
use crate::audio_constants::{
    CHUNK_SAMPLES, DEFAULT_SAMPLE_RATE, ENERGY_HISTORY_LEN, NOISE_GATE_RATIO,
    NOISE_THRESHOLD_RATIO, NOISE_UPDATE_RATE, PRE_EMPHASIS_COEFFICIENT, VAD_ENERGY_THRESHOLD,
    VAD_HANGOVER_MS, VAD_SENSITIVITY, VAD_SILENCE_TIMEOUT_MS,
};
use crate::features::PreEmphasisFilter;
use crate::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Error type for VAD operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VadError {
    /// Invalid configuration (e.g., non-positive sensitivity)
    #[error("VAD configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

/// VAD configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// Expected samples per frame (one capture chunk)
    pub frame_size: usize,
    /// Base RMS threshold, divided by `sensitivity`
    pub energy_threshold: f32,
    /// Continuous silence before `on_silence_detected` fires
    pub silence_timeout_ms: u64,
    /// Quiet time after the last loud frame that still counts as speech
    pub hangover_ms: u64,
    /// Pre-emphasis coefficient; 0 disables the filter
    pub pre_emphasis: f32,
    /// Sensitivity multiplier, must be > 0
    pub sensitivity: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: CHUNK_SAMPLES,
            energy_threshold: VAD_ENERGY_THRESHOLD,
            silence_timeout_ms: VAD_SILENCE_TIMEOUT_MS,
            hangover_ms: VAD_HANGOVER_MS,
            pre_emphasis: PRE_EMPHASIS_COEFFICIENT,
            sensitivity: VAD_SENSITIVITY,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<(), VadError> {
        if self.sample_rate == 0 {
            return Err(VadError::ConfigurationInvalid(
                "sample_rate must be positive".to_string(),
            ));
        }
        if self.frame_size == 0 {
            return Err(VadError::ConfigurationInvalid(
                "frame_size must be positive".to_string(),
            ));
        }
        if !self.energy_threshold.is_finite() || self.energy_threshold < 0.0 {
            return Err(VadError::ConfigurationInvalid(format!(
                "energy_threshold must be a non-negative number, got {}",
                self.energy_threshold
            )));
        }
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(VadError::ConfigurationInvalid(format!(
                "sensitivity must be greater than 0, got {}",
                self.sensitivity
            )));
        }
        if !self.pre_emphasis.is_finite() {
            return Err(VadError::ConfigurationInvalid(
                "pre_emphasis must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Threshold before the noise floor is taken into account
    pub fn baseline_threshold(&self) -> f32 {
        self.energy_threshold / self.sensitivity
    }
}

/// Partial configuration change; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfigUpdate {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub energy_threshold: Option<f32>,
    pub silence_timeout_ms: Option<u64>,
    pub hangover_ms: Option<u64>,
    pub pre_emphasis: Option<f32>,
    pub sensitivity: Option<f32>,
}

impl VadConfigUpdate {
    /// Return `base` with every `Some` field of this update applied
    pub fn merged_into(&self, base: &VadConfig) -> VadConfig {
        VadConfig {
            sample_rate: self.sample_rate.unwrap_or(base.sample_rate),
            frame_size: self.frame_size.unwrap_or(base.frame_size),
            energy_threshold: self.energy_threshold.unwrap_or(base.energy_threshold),
            silence_timeout_ms: self.silence_timeout_ms.unwrap_or(base.silence_timeout_ms),
            hangover_ms: self.hangover_ms.unwrap_or(base.hangover_ms),
            pre_emphasis: self.pre_emphasis.unwrap_or(base.pre_emphasis),
            sensitivity: self.sensitivity.unwrap_or(base.sensitivity),
        }
    }
}

/// Where the detector is in the speech/silence timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeechPhase {
    /// Loud frames, or the start of a session
    Speaking,
    /// Quiet, but still within the hangover window
    PendingSilence,
    /// Speech ended; accumulating silence toward the timeout
    Silent,
    /// Silence timeout reached and reported; waits for speech to re-arm
    SilenceReported,
}

/// Transition produced by a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechEnded,
    SilenceDetected { duration_ms: u64 },
}

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct VadResult {
    pub is_speech: bool,
    pub energy: f32,
    pub timestamp_ms: u64,
    /// Transition caused by this frame, if any
    pub event: Option<VadEvent>,
}

/// Snapshot of detector state for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VadStats {
    pub is_running: bool,
    pub background_noise: f32,
    pub average_energy: f32,
    pub current_silence_duration_ms: u64,
}

pub type SpeechCallback = Box<dyn FnMut() + Send>;
pub type SilenceCallback = Box<dyn FnMut(u64) + Send>;
pub type EnergyCallback = Box<dyn FnMut(f32) + Send>;

/// Event hooks; `set_callbacks` merges the `Some` entries into the current set
#[derive(Default)]
pub struct VadCallbacks {
    pub on_speech_start: Option<SpeechCallback>,
    pub on_speech_end: Option<SpeechCallback>,
    /// Receives the silence duration in milliseconds
    pub on_silence_detected: Option<SilenceCallback>,
    /// Receives the RMS energy of every processed frame
    pub on_energy_update: Option<EnergyCallback>,
}

impl VadCallbacks {
    fn merge(&mut self, other: VadCallbacks) {
        if other.on_speech_start.is_some() {
            self.on_speech_start = other.on_speech_start;
        }
        if other.on_speech_end.is_some() {
            self.on_speech_end = other.on_speech_end;
        }
        if other.on_silence_detected.is_some() {
            self.on_silence_detected = other.on_silence_detected;
        }
        if other.on_energy_update.is_some() {
            self.on_energy_update = other.on_energy_update;
        }
    }
}

impl std::fmt::Debug for VadCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VadCallbacks")
            .field("on_speech_start", &self.on_speech_start.is_some())
            .field("on_speech_end", &self.on_speech_end.is_some())
            .field("on_silence_detected", &self.on_silence_detected.is_some())
            .field("on_energy_update", &self.on_energy_update.is_some())
            .finish()
    }
}

/// Energy-based voice activity detector
///
/// Frames are classified against `max(threshold / sensitivity, 2 × noise)`,
/// where `noise` is the background estimate as it stood before the frame.
/// While stopped, every frame reports silence with zero energy.
pub struct VoiceActivityDetector {
    config: VadConfig,
    clock: Arc<dyn Clock>,
    callbacks: VadCallbacks,
    is_running: bool,
    phase: SpeechPhase,
    /// When the current silence period started (after the hangover)
    silence_start_ms: Option<u64>,
    /// Last loud frame; the session's first frame until speech is heard
    last_speech_ms: Option<u64>,
    last_frame_ms: Option<u64>,
    /// Frame times come from `process_frame_at` rather than the clock
    frame_timestamps: bool,
    energy_history: VecDeque<f32>,
    background_noise: f32,
    pre_emphasis: PreEmphasisFilter,
}

impl VoiceActivityDetector {
    /// Create a detector driven by the wall clock
    pub fn new(config: VadConfig) -> Result<Self, VadError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a detector with an explicit time source
    pub fn with_clock(config: VadConfig, clock: Arc<dyn Clock>) -> Result<Self, VadError> {
        config.validate()?;
        debug!(
            "[vad] Detector created: threshold={}, silence_timeout={}ms, hangover={}ms, sensitivity={}",
            config.energy_threshold, config.silence_timeout_ms, config.hangover_ms, config.sensitivity
        );

        Ok(Self {
            pre_emphasis: PreEmphasisFilter::new(config.pre_emphasis),
            config,
            clock,
            callbacks: VadCallbacks::default(),
            is_running: false,
            phase: SpeechPhase::Speaking,
            silence_start_ms: None,
            last_speech_ms: None,
            last_frame_ms: None,
            frame_timestamps: false,
            energy_history: VecDeque::with_capacity(ENERGY_HISTORY_LEN),
            background_noise: 0.0,
        })
    }

    /// Begin a fresh session; no-op with a warning if already running
    pub fn start(&mut self) {
        if self.is_running {
            warn!("[vad] start() called while already running");
            return;
        }
        self.clear_session_state();
        self.is_running = true;
        info!("[vad] Voice activity detection started");
    }

    /// End the session, dropping pending timers; config and callbacks are kept
    pub fn stop(&mut self) {
        if !self.is_running {
            return;
        }
        self.is_running = false;
        self.silence_start_ms = None;
        self.phase = SpeechPhase::Speaking;
        self.energy_history.clear();
        info!("[vad] Voice activity detection stopped");
    }

    /// Classify one frame and advance the timing state machine
    pub fn process_frame(&mut self, frame: &[f32]) -> VadResult {
        self.frame_timestamps = false;
        let now = self.clock.now_ms();
        self.classify(frame, now)
    }

    /// Classify one frame stamped with its position in the audio stream
    ///
    /// Hangover and silence timing follow `timestamp_ms` instead of the
    /// clock, so replaying a file faster than real time yields the same
    /// events as playing it live.
    pub fn process_frame_at(&mut self, frame: &[f32], timestamp_ms: u64) -> VadResult {
        self.frame_timestamps = true;
        self.classify(frame, timestamp_ms)
    }

    fn classify(&mut self, frame: &[f32], now: u64) -> VadResult {
        if !self.is_running {
            return VadResult {
                is_speech: false,
                energy: 0.0,
                timestamp_ms: now,
                event: None,
            };
        }

        self.last_frame_ms = Some(now);
        if self.last_speech_ms.is_none() {
            self.last_speech_ms = Some(now);
        }

        let emphasized = self.pre_emphasis.apply(frame);
        let energy = calculate_rms(&emphasized);

        let threshold = self
            .config
            .baseline_threshold()
            .max(self.background_noise * NOISE_THRESHOLD_RATIO);
        let is_speech = energy > threshold;
        self.update_background_noise(energy, is_speech);

        let event = if is_speech {
            self.on_loud_frame(now)
        } else {
            self.on_quiet_frame(now)
        };

        if self.energy_history.len() == ENERGY_HISTORY_LEN {
            self.energy_history.pop_front();
        }
        self.energy_history.push_back(energy);

        trace!(
            "[vad] energy={:.4}, threshold={:.4}, speech={}, phase={:?}",
            energy,
            threshold,
            is_speech,
            self.phase
        );

        self.dispatch(event, energy);

        VadResult {
            is_speech,
            energy,
            timestamp_ms: now,
            event,
        }
    }

    fn on_loud_frame(&mut self, now: u64) -> Option<VadEvent> {
        self.last_speech_ms = Some(now);
        self.silence_start_ms = None;
        let previous = std::mem::replace(&mut self.phase, SpeechPhase::Speaking);

        match previous {
            SpeechPhase::Silent | SpeechPhase::SilenceReported => {
                debug!("[vad] Speech activity resumed");
                Some(VadEvent::SpeechStarted)
            }
            SpeechPhase::Speaking | SpeechPhase::PendingSilence => None,
        }
    }

    fn on_quiet_frame(&mut self, now: u64) -> Option<VadEvent> {
        match self.phase {
            SpeechPhase::Speaking | SpeechPhase::PendingSilence => {
                let since_speech = now.saturating_sub(self.last_speech_ms.unwrap_or(now));
                if since_speech <= self.config.hangover_ms {
                    self.phase = SpeechPhase::PendingSilence;
                    None
                } else {
                    self.phase = SpeechPhase::Silent;
                    self.silence_start_ms = Some(now);
                    debug!("[vad] Silence period started ({}ms since speech)", since_speech);
                    Some(VadEvent::SpeechEnded)
                }
            }
            SpeechPhase::Silent => {
                let started = self.silence_start_ms.unwrap_or(now);
                let duration_ms = now.saturating_sub(started);
                if duration_ms >= self.config.silence_timeout_ms {
                    self.phase = SpeechPhase::SilenceReported;
                    self.silence_start_ms = None;
                    info!("[vad] Silence detected ({}ms)", duration_ms);
                    Some(VadEvent::SilenceDetected { duration_ms })
                } else {
                    None
                }
            }
            SpeechPhase::SilenceReported => None,
        }
    }

    fn update_background_noise(&mut self, energy: f32, is_speech: bool) {
        if self.background_noise == 0.0 {
            // Seed from the first quiet frame so a loud opener can't set the floor
            if !is_speech {
                self.background_noise = energy;
            }
        } else if energy < self.background_noise * NOISE_GATE_RATIO {
            self.background_noise =
                (1.0 - NOISE_UPDATE_RATE) * self.background_noise + NOISE_UPDATE_RATE * energy;
        }
    }

    fn dispatch(&mut self, event: Option<VadEvent>, energy: f32) {
        match event {
            Some(VadEvent::SpeechStarted) => {
                if let Some(cb) = self.callbacks.on_speech_start.as_mut() {
                    cb();
                }
            }
            Some(VadEvent::SpeechEnded) => {
                if let Some(cb) = self.callbacks.on_speech_end.as_mut() {
                    cb();
                }
            }
            Some(VadEvent::SilenceDetected { duration_ms }) => {
                if let Some(cb) = self.callbacks.on_silence_detected.as_mut() {
                    cb(duration_ms);
                }
            }
            None => {}
        }
        if let Some(cb) = self.callbacks.on_energy_update.as_mut() {
            cb(energy);
        }
    }

    /// Merge callbacks into the current set; unset entries are left alone
    pub fn set_callbacks(&mut self, callbacks: VadCallbacks) {
        self.callbacks.merge(callbacks);
    }

    pub fn stats(&self) -> VadStats {
        let average_energy = if self.energy_history.is_empty() {
            0.0
        } else {
            self.energy_history.iter().sum::<f32>() / self.energy_history.len() as f32
        };

        VadStats {
            is_running: self.is_running,
            background_noise: self.background_noise,
            average_energy,
            current_silence_duration_ms: self
                .silence_start_ms
                .map(|start| self.now_ms().saturating_sub(start))
                .unwrap_or(0),
        }
    }

    /// Apply a partial config change, effective from the next frame
    ///
    /// The merged config is validated first; on error nothing changes.
    pub fn update_config(&mut self, update: VadConfigUpdate) -> Result<(), VadError> {
        let merged = update.merged_into(&self.config);
        merged.validate()?;
        self.pre_emphasis.set_coefficient(merged.pre_emphasis);
        self.config = merged;
        debug!("[vad] Configuration updated: {:?}", self.config);
        Ok(())
    }

    /// Clear session state, keeping config, callbacks and the running flag
    pub fn reset(&mut self) {
        self.clear_session_state();
        debug!("[vad] State reset");
    }

    fn clear_session_state(&mut self) {
        self.phase = SpeechPhase::Speaking;
        self.silence_start_ms = None;
        self.last_speech_ms = None;
        self.last_frame_ms = None;
        self.energy_history.clear();
        self.background_noise = 0.0;
        self.pre_emphasis.reset();
    }

    pub fn is_in_silence(&self) -> bool {
        self.silence_start_ms.is_some()
    }

    pub fn time_since_last_speech_ms(&self) -> u64 {
        self.last_speech_ms
            .map(|last| self.now_ms().saturating_sub(last))
            .unwrap_or(0)
    }

    /// Current time on whichever timeline frames are arriving on
    fn now_ms(&self) -> u64 {
        if self.frame_timestamps {
            self.last_frame_ms.unwrap_or(0)
        } else {
            self.clock.now_ms()
        }
    }

    /// Invoke `on_silence_detected` with the configured timeout, bypassing the state machine
    pub fn force_silence_detection(&mut self) {
        let timeout = self.config.silence_timeout_ms;
        if let Some(cb) = self.callbacks.on_silence_detected.as_mut() {
            info!("[vad] Forced silence detection");
            cb(timeout);
        }
    }

    /// Stop and drop all callbacks and history
    pub fn cleanup(&mut self) {
        self.stop();
        self.callbacks = VadCallbacks::default();
        self.energy_history.clear();
        debug!("[vad] Cleanup completed");
    }

    pub fn phase(&self) -> SpeechPhase {
        self.phase
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }
}

impl std::fmt::Debug for VoiceActivityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceActivityDetector")
            .field("config", &self.config)
            .field("is_running", &self.is_running)
            .field("phase", &self.phase)
            .field("background_noise", &self.background_noise)
            .finish_non_exhaustive()
    }
}

/// Calculate RMS (root mean square) energy of audio samples
///
/// Returns 0.0 for empty input.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
#[path = "vad_test.rs"]
mod tests;
