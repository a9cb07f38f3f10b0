// Detection pipeline for continuous wake word detection
// Routes each audio chunk through the sliding window, VAD, feature extractor and classifier

use super::buffer::SlidingAudioBuffer;
use super::classifier::{ClassifierError, ModelLoader, WakeWordClassifier};
use super::clock::Clock;
use super::events::{ListeningEvent, SharedListeners};
use super::vad::{VadConfig, VadResult, VoiceActivityDetector};
use crate::audio::AudioChunk;
use crate::audio_constants::{DETECTION_THRESHOLD, INFERENCE_TIMING_HISTORY, WINDOW_SAMPLES};
use crate::features::{FeatureConfig, FeatureError, FeatureExtractor};
use crate::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc as tokio_mpsc;

/// Detection decision settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// A chunk fires when confidence is strictly greater than this
    pub threshold: f32,
    /// Minimum spacing between detections; `None` fires on every chunk above threshold
    pub cooldown_ms: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DETECTION_THRESHOLD,
            cooldown_ms: None,
        }
    }
}

/// Counters for one engine instance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub chunks_processed: u64,
    /// Chunks dropped because the worker queue was full
    pub chunks_dropped: u64,
    pub inferences_run: u64,
    /// Cycles skipped because the window was not yet full
    pub inferences_skipped_underrun: u64,
    /// Cycles skipped to catch up with a queued backlog
    pub inferences_skipped_backlog: u64,
    pub inference_errors: u64,
    pub detections: u64,
    /// Above-threshold results inside the cooldown window
    pub detections_suppressed: u64,
    pub listener_panics: u64,
    /// Mean over the most recent inferences
    pub average_inference_ms: f64,
}

/// What happened to the inference cycle of one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// Window not yet full
    Underrun,
    /// Skipped while draining a backlog
    Skipped,
    /// Inference ran; `detected` is true if listeners were notified
    Scored { confidence: f32, detected: bool },
    /// The classifier failed; the pipeline keeps running
    Failed(ClassifierError),
}

/// Result of feeding one chunk through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub vad: VadResult,
    pub inference: InferenceOutcome,
}

impl ChunkOutcome {
    /// True if this chunk's inference fired a detection
    pub fn detected(&self) -> bool {
        matches!(
            self.inference,
            InferenceOutcome::Scored { detected: true, .. }
        )
    }
}

/// Buffer, VAD, feature extraction and classification for one audio stream
///
/// Not thread-safe on its own; the engine owns it behind a mutex and feeds
/// it from a single worker, so chunks are processed strictly in order.
pub struct DetectionPipeline {
    buffer: SlidingAudioBuffer,
    vad: VoiceActivityDetector,
    extractor: FeatureExtractor,
    classifier: WakeWordClassifier,
    listeners: SharedListeners,
    event_tx: Option<tokio_mpsc::Sender<ListeningEvent>>,
    detection: DetectionConfig,
    emit_energy_events: bool,
    /// Time the VAD by chunk timestamps instead of its clock
    chunk_timestamps: bool,
    last_detection_ms: Option<u64>,
    stats: EngineStats,
    inference_times_ms: VecDeque<f64>,
}

impl DetectionPipeline {
    pub fn new(
        vad_config: VadConfig,
        feature_config: FeatureConfig,
        detection: DetectionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let vad = VoiceActivityDetector::with_clock(vad_config, clock)?;
        // Room for every feature frame, even when frames outgrow the 1.5s window
        let window = WINDOW_SAMPLES.max(feature_config.samples_for_all_frames());
        let extractor = FeatureExtractor::new(feature_config)?;
        if window > WINDOW_SAMPLES {
            debug!("[pipeline] Feature frames need {} samples, widening window", window);
        }
        Ok(Self {
            buffer: SlidingAudioBuffer::new(window),
            vad,
            extractor,
            classifier: WakeWordClassifier::new(),
            listeners: SharedListeners::new(),
            event_tx: None,
            detection,
            emit_energy_events: false,
            chunk_timestamps: false,
            last_detection_ms: None,
            stats: EngineStats::default(),
            inference_times_ms: VecDeque::with_capacity(INFERENCE_TIMING_HISTORY),
        })
    }

    /// Use an existing listener registry (shared with the engine handle)
    pub fn with_listeners(mut self, listeners: SharedListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Forward `EnergyUpdate` events for every chunk
    pub fn with_energy_events(mut self, enabled: bool) -> Self {
        self.emit_energy_events = enabled;
        self
    }

    /// Drive VAD timing from `AudioChunk::timestamp_ms`
    ///
    /// For sources whose timestamps follow the media position (file
    /// replay), where the wall clock says nothing about elapsed audio.
    pub fn with_chunk_timestamps(mut self, enabled: bool) -> Self {
        self.chunk_timestamps = enabled;
        self
    }

    pub fn set_chunk_timestamps(&mut self, enabled: bool) {
        self.chunk_timestamps = enabled;
    }

    pub fn set_event_sender(&mut self, tx: Option<tokio_mpsc::Sender<ListeningEvent>>) {
        self.event_tx = tx;
    }

    pub fn load_model(&mut self, loader: &dyn ModelLoader) -> Result<(), ClassifierError> {
        info!("[pipeline] Loading {}", loader.describe());
        self.classifier.load(loader)
    }

    pub fn unload_model(&mut self) {
        self.classifier.unload();
    }

    pub fn classifier_mut(&mut self) -> &mut WakeWordClassifier {
        &mut self.classifier
    }

    /// Begin a session: empty window, fresh VAD timing, cooldown cleared
    pub fn start(&mut self) {
        self.buffer.clear();
        self.last_detection_ms = None;
        self.vad.start();
        debug!("[pipeline] Session started");
    }

    pub fn stop(&mut self) {
        self.vad.stop();
        self.buffer.clear();
        debug!("[pipeline] Session stopped");
    }

    /// Append one chunk, run the VAD and one inference cycle, then notify listeners
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> ChunkOutcome {
        let outcome = self.ingest(chunk, true);
        if outcome.detected() {
            self.listeners.notify();
        }
        outcome
    }

    /// Process a queued batch in order, running inference only for the newest chunk
    pub fn process_batch(&mut self, chunks: &[AudioChunk]) -> Vec<ChunkOutcome> {
        let last = chunks.len().saturating_sub(1);
        let outcomes: Vec<ChunkOutcome> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| self.ingest(chunk, i == last))
            .collect();
        for _ in outcomes.iter().filter(|o| o.detected()) {
            self.listeners.notify();
        }
        outcomes
    }

    /// Append one chunk and run the VAD; run inference only if `infer`
    ///
    /// Does not call wake word listeners. Callers holding the pipeline
    /// behind a lock release it first, then call `listeners().notify()`
    /// for each outcome that `detected()`.
    pub fn ingest(&mut self, chunk: &AudioChunk, infer: bool) -> ChunkOutcome {
        self.stats.chunks_processed += 1;
        self.buffer.append(&chunk.samples);

        let vad = if self.chunk_timestamps {
            self.vad.process_frame_at(&chunk.samples, chunk.timestamp_ms)
        } else {
            self.vad.process_frame(&chunk.samples)
        };
        if let Some(event) = vad.event {
            self.emit(ListeningEvent::from_vad(event, chunk.timestamp_ms));
        }
        if self.emit_energy_events && self.vad.is_running() {
            self.emit(ListeningEvent::EnergyUpdate {
                energy: vad.energy,
                timestamp_ms: chunk.timestamp_ms,
            });
        }

        let inference = if infer {
            self.run_inference(chunk.timestamp_ms)
        } else {
            self.stats.inferences_skipped_backlog += 1;
            InferenceOutcome::Skipped
        };

        ChunkOutcome { vad, inference }
    }

    /// Score the current window and decide whether it is a detection
    ///
    /// Publishes `WakeWordDetected`; listeners are left to the caller.
    pub fn run_inference(&mut self, timestamp_ms: u64) -> InferenceOutcome {
        if !self.buffer.is_full() {
            self.stats.inferences_skipped_underrun += 1;
            trace!(
                "[pipeline] Window not full ({}/{}), skipping inference",
                self.buffer.len(),
                self.buffer.capacity()
            );
            return InferenceOutcome::Underrun;
        }

        let started = Instant::now();
        let window = self.buffer.snapshot();
        let features = self.extractor.extract(&window);
        let result = self.classifier.infer(&features);
        self.record_inference_time(started.elapsed().as_secs_f64() * 1000.0);

        let confidence = match result {
            Ok(confidence) => confidence,
            Err(e) => {
                self.stats.inference_errors += 1;
                warn!("[pipeline] Inference failed: {}", e);
                self.emit(ListeningEvent::error(e.to_string()));
                return InferenceOutcome::Failed(e);
            }
        };
        self.stats.inferences_run += 1;

        if confidence <= self.detection.threshold {
            return InferenceOutcome::Scored {
                confidence,
                detected: false,
            };
        }

        if let (Some(cooldown), Some(last)) = (self.detection.cooldown_ms, self.last_detection_ms) {
            if timestamp_ms.saturating_sub(last) < cooldown {
                self.stats.detections_suppressed += 1;
                trace!("[pipeline] Detection within cooldown, suppressed");
                return InferenceOutcome::Scored {
                    confidence,
                    detected: false,
                };
            }
        }

        self.last_detection_ms = Some(timestamp_ms);
        self.stats.detections += 1;
        info!("[pipeline] Wake word detected (confidence={:.3})", confidence);

        self.emit(ListeningEvent::WakeWordDetected {
            confidence,
            timestamp_ms,
        });

        InferenceOutcome::Scored {
            confidence,
            detected: true,
        }
    }

    fn record_inference_time(&mut self, ms: f64) {
        if self.inference_times_ms.len() == INFERENCE_TIMING_HISTORY {
            self.inference_times_ms.pop_front();
        }
        self.inference_times_ms.push_back(ms);
        self.stats.average_inference_ms =
            self.inference_times_ms.iter().sum::<f64>() / self.inference_times_ms.len() as f64;
    }

    /// Send on the event channel without blocking; drops on overflow
    pub fn emit(&self, event: ListeningEvent) {
        if let Some(tx) = self.event_tx.as_ref() {
            if let Err(e) = tx.try_send(event) {
                trace!("[pipeline] Dropped event: {}", e);
            }
        }
    }

    pub fn listeners(&self) -> &SharedListeners {
        &self.listeners
    }

    pub fn vad(&self) -> &VoiceActivityDetector {
        &self.vad
    }

    pub fn vad_mut(&mut self) -> &mut VoiceActivityDetector {
        &mut self.vad
    }

    pub fn buffer(&self) -> &SlidingAudioBuffer {
        &self.buffer
    }

    pub fn detection_config(&self) -> &DetectionConfig {
        &self.detection
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.clone();
        stats.listener_panics = self.listeners.panics();
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = EngineStats::default();
        self.inference_times_ms.clear();
        self.listeners.reset_panics();
    }
}

impl std::fmt::Debug for DetectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionPipeline")
            .field("buffered", &self.buffer.len())
            .field("vad_running", &self.vad.is_running())
            .field("model_loaded", &self.classifier.is_loaded())
            .field("listeners", &self.listeners.len())
            .field("detection", &self.detection)
            .finish()
    }
}

/// Errors building a pipeline from configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Vad(#[from] super::vad::VadError),
    #[error(transparent)]
    Features(#[from] FeatureError),
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
