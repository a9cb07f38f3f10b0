// Wake word engine: session lifecycle around the detection pipeline
// Owns the sample source, the model loader and a single worker thread that drains the chunk queue

use super::classifier::{ClassifierError, ModelLoader};
use super::clock::{Clock, SystemClock};
use super::events::{EngineState, ListenerId, ListeningEvent, SharedListeners, WakeWordListener};
use super::pipeline::{ChunkOutcome, DetectionConfig, DetectionPipeline, EngineStats, PipelineError};
use super::vad::{VadCallbacks, VadConfig, VadConfigUpdate, VadError, VadStats};
use crate::audio::{AudioCaptureError, AudioChunk, SampleSource};
use crate::audio_constants::{
    CHUNK_QUEUE_CAPACITY, EVENT_CHANNEL_BUFFER_SIZE, WORKER_JOIN_TIMEOUT_MS,
    WORKER_POLL_INTERVAL_MS,
};
use crate::features::{FeatureConfig, FeatureError};
use crate::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;

/// Errors surfaced by the engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Model asset missing or corrupt; the engine is left `Failed`
    #[error("Model load failed: {0}")]
    ModelLoad(ClassifierError),
    /// Microphone denied or unavailable; the engine is left `Idle`
    #[error("Microphone unavailable: {0}")]
    Microphone(AudioCaptureError),
    /// Operation requires a `Listening` session
    #[error("Engine is not listening")]
    NotListening,
    #[error(transparent)]
    Vad(#[from] VadError),
    #[error(transparent)]
    Features(#[from] FeatureError),
    /// The processing thread could not be started or stopped
    #[error("Worker error: {0}")]
    Worker(String),
}

impl From<PipelineError> for EngineError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Vad(e) => EngineError::Vad(e),
            PipelineError::Features(e) => EngineError::Features(e),
        }
    }
}

/// Everything needed to build an engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub vad: VadConfig,
    pub features: FeatureConfig,
    pub detection: DetectionConfig,
    /// Forward per-chunk `EnergyUpdate` events on the event channel
    pub emit_energy_events: bool,
}

/// Always-on wake word detector
///
/// `start()` loads the model, then opens the sample source; chunks are
/// queued (bounded, dropping on overflow) and processed in arrival order by
/// one worker thread. `stop()` closes the source and releases the model.
pub struct WakeWordEngine {
    state: EngineState,
    source: Box<dyn SampleSource>,
    loader: Box<dyn ModelLoader>,
    pipeline: Arc<Mutex<DetectionPipeline>>,
    listeners: SharedListeners,
    event_tx: Option<tokio_mpsc::Sender<ListeningEvent>>,
    chunks_dropped: Arc<AtomicU64>,
    should_stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    /// Receiver for worker exit notification
    worker_exit_rx: Option<Receiver<()>>,
}

impl WakeWordEngine {
    pub fn new(
        config: EngineConfig,
        source: Box<dyn SampleSource>,
        loader: Box<dyn ModelLoader>,
    ) -> Result<Self, EngineError> {
        Self::with_clock(config, source, loader, Arc::new(SystemClock))
    }

    /// Build an engine whose VAD timing follows `clock`
    pub fn with_clock(
        config: EngineConfig,
        source: Box<dyn SampleSource>,
        loader: Box<dyn ModelLoader>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let listeners = SharedListeners::new();
        let pipeline = DetectionPipeline::new(config.vad, config.features, config.detection, clock)?
            .with_listeners(listeners.clone())
            .with_energy_events(config.emit_energy_events);

        Ok(Self {
            state: EngineState::Idle,
            source,
            loader,
            pipeline: Arc::new(Mutex::new(pipeline)),
            listeners,
            event_tx: None,
            chunks_dropped: Arc::new(AtomicU64::new(0)),
            should_stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            worker_exit_rx: None,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == EngineState::Listening
    }

    /// Start a listening session
    ///
    /// No-op if already `Listening` or `Initializing`. The model is loaded
    /// before the source is opened; if opening the source fails the model is
    /// released again and the engine returns to `Idle`.
    ///
    /// # Errors
    /// - `ModelLoad` if the model cannot be loaded (state becomes `Failed`)
    /// - `Microphone` if the source cannot be opened (state becomes `Idle`)
    /// - `Worker` if a previous session's worker has not exited yet
    pub fn start(&mut self) -> Result<(), EngineError> {
        if matches!(self.state, EngineState::Listening | EngineState::Initializing) {
            debug!("[engine] Start called but already {:?}", self.state);
            return Ok(());
        }

        // A previous worker may still be winding down after a stop from a listener
        if let Some(rx) = self.worker_exit_rx.take() {
            debug!("[engine] Waiting for previous worker to exit...");
            match rx.recv_timeout(Duration::from_millis(WORKER_JOIN_TIMEOUT_MS)) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if let Some(handle) = self.worker.take() {
                        let _ = handle.join();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.worker_exit_rx = Some(rx);
                    warn!("[engine] Previous worker still running, refusing to start");
                    return Err(EngineError::Worker(
                        "previous session is still shutting down".to_string(),
                    ));
                }
            }
        }

        info!("[engine] Starting wake word engine...");
        self.transition(EngineState::Initializing);

        // Model first, so a bad asset never leaves the microphone open
        let loaded = self.pipeline.lock().load_model(self.loader.as_ref());
        if let Err(e) = loaded {
            error!("[engine] Model load failed: {}", e);
            self.transition(EngineState::Failed);
            return Err(EngineError::ModelLoad(e));
        }
        {
            let mut pipeline = self.pipeline.lock();
            pipeline.set_chunk_timestamps(self.source.timestamps_follow_media());
            pipeline.start();
        }

        let (chunk_tx, chunk_rx) = mpsc::sync_channel(CHUNK_QUEUE_CAPACITY);
        self.should_stop.store(false, Ordering::SeqCst);
        if let Err(e) = self.spawn_worker(chunk_rx) {
            self.release_pipeline();
            self.transition(EngineState::Idle);
            return Err(e);
        }

        if let Err(e) = self.source.open(chunk_sink(chunk_tx, self.chunks_dropped.clone())) {
            error!("[engine] Failed to open audio source: {}", e);
            self.shutdown_worker();
            self.release_pipeline();
            self.transition(EngineState::Idle);
            return Err(EngineError::Microphone(e));
        }

        self.transition(EngineState::Listening);
        info!("[engine] Listening");
        Ok(())
    }

    /// End the session, closing the source and releasing the model
    ///
    /// Safe from any state and idempotent; outside `Listening` it does
    /// nothing. May be called from a wake word listener.
    pub fn stop(&mut self) {
        if self.state != EngineState::Listening {
            debug!("[engine] Stop called in {:?}, nothing to do", self.state);
            return;
        }
        info!("[engine] Stopping wake word engine...");

        self.should_stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.source.close() {
            warn!("[engine] Error closing audio source: {}", e);
        }

        if self.on_worker_thread() {
            // Called from a listener: the worker holds the pipeline and
            // releases the model itself once the listener returns
            debug!("[engine] Stop requested from worker thread, not joining");
        } else {
            self.shutdown_worker();
            self.release_pipeline();
        }

        self.transition(EngineState::Stopped);
        info!("[engine] Stopped");
    }

    /// Run one chunk synchronously on the caller's thread
    ///
    /// Listeners are called after the pipeline lock is released.
    pub fn process_chunk(&self, chunk: &AudioChunk) -> Result<ChunkOutcome, EngineError> {
        if self.state != EngineState::Listening {
            return Err(EngineError::NotListening);
        }
        let outcome = self.pipeline.lock().ingest(chunk, true);
        if outcome.detected() {
            self.listeners.notify();
        }
        Ok(outcome)
    }

    /// Register a wake word listener; listeners run in registration order
    pub fn add_listener(&self, listener: WakeWordListener) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Subscribe to typed engine events
    ///
    /// Each call creates a new bounded channel; only the most recent
    /// receiver gets events. Events are dropped if the receiver falls behind.
    pub fn subscribe_events(&mut self) -> tokio_mpsc::Receiver<ListeningEvent> {
        let (tx, rx) = tokio_mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
        self.pipeline.lock().set_event_sender(Some(tx.clone()));
        self.event_tx = Some(tx);
        rx
    }

    /// Merge VAD callbacks; they run on the worker thread
    pub fn set_vad_callbacks(&self, callbacks: VadCallbacks) {
        self.pipeline.lock().vad_mut().set_callbacks(callbacks);
    }

    pub fn update_vad_config(&self, update: VadConfigUpdate) -> Result<(), EngineError> {
        self.pipeline.lock().vad_mut().update_config(update)?;
        Ok(())
    }

    pub fn vad_stats(&self) -> VadStats {
        self.pipeline.lock().vad().stats()
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.pipeline.lock().stats();
        stats.chunks_dropped = self.chunks_dropped.load(Ordering::SeqCst);
        stats
    }

    pub fn reset_stats(&self) {
        self.pipeline.lock().reset_stats();
        self.chunks_dropped.store(0, Ordering::SeqCst);
    }

    fn transition(&mut self, to: EngineState) {
        let from = std::mem::replace(&mut self.state, to);
        if from == to {
            return;
        }
        debug!("[engine] {:?} -> {:?}", from, to);
        if let Some(tx) = self.event_tx.as_ref() {
            if let Err(e) = tx.try_send(ListeningEvent::StateChanged { from, to }) {
                trace!("[engine] Dropped state event: {}", e);
            }
        }
    }

    fn spawn_worker(&mut self, chunk_rx: Receiver<AudioChunk>) -> Result<(), EngineError> {
        let pipeline = self.pipeline.clone();
        let listeners = self.listeners.clone();
        let should_stop = self.should_stop.clone();
        let (exit_tx, exit_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("wakeword-worker".to_string())
            .spawn(move || {
                worker_main(chunk_rx, pipeline, listeners, should_stop);
                // Signal that thread has exited
                let _ = exit_tx.send(());
            })
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        self.worker = Some(worker);
        self.worker_exit_rx = Some(exit_rx);
        Ok(())
    }

    /// Signal the worker and wait (bounded) for it to exit
    fn shutdown_worker(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        let timeout = Duration::from_millis(WORKER_JOIN_TIMEOUT_MS);

        if let Some(rx) = self.worker_exit_rx.take() {
            match rx.recv_timeout(timeout) {
                Ok(()) => debug!("[engine] Worker exit confirmed"),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "[engine] Timeout waiting for worker to exit ({}ms)",
                        timeout.as_millis()
                    );
                    // Keep the receiver so the next start() waits for this worker
                    self.worker_exit_rx = Some(rx);
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("[engine] Worker already exited");
                }
            }
        }

        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn release_pipeline(&mut self) {
        // Skip if a timed-out worker still owns the pipeline; it releases on exit
        if self.worker_exit_rx.is_some() {
            return;
        }
        let mut pipeline = self.pipeline.lock();
        pipeline.stop();
        pipeline.unload_model();
    }

    fn worker_thread_id(&self) -> Option<ThreadId> {
        self.worker.as_ref().map(|h| h.thread().id())
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_thread_id() == Some(thread::current().id())
    }
}

impl Drop for WakeWordEngine {
    fn drop(&mut self) {
        if self.on_worker_thread() {
            // Dropped from a listener; just signal and let the worker wind down
            self.should_stop.store(true, Ordering::SeqCst);
            let _ = self.source.close();
            return;
        }
        self.stop();
    }
}

impl std::fmt::Debug for WakeWordEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeWordEngine")
            .field("state", &self.state)
            .field("source_open", &self.source.is_open())
            .field("model", &self.loader.describe())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Sink handed to the source: never blocks the audio callback
fn chunk_sink(
    tx: SyncSender<AudioChunk>,
    dropped: Arc<AtomicU64>,
) -> crate::audio::ChunkSink {
    Box::new(move |chunk| match tx.try_send(chunk) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("[engine] Chunk queue full, dropped chunk ({} total)", total);
        }
        Err(TrySendError::Disconnected(_)) => {
            trace!("[engine] Worker gone, discarding chunk");
        }
    })
}

/// Main loop for the worker thread
///
/// Drains the queue in arrival order. A backlog is processed as one batch:
/// every chunk goes through the buffer and VAD, but only the newest window
/// is scored. Listeners run after the pipeline lock is released, so they
/// may call back into the engine.
fn worker_main(
    chunk_rx: Receiver<AudioChunk>,
    pipeline: Arc<Mutex<DetectionPipeline>>,
    listeners: SharedListeners,
    should_stop: Arc<AtomicBool>,
) {
    debug!("[engine] Worker started");
    let poll = Duration::from_millis(WORKER_POLL_INTERVAL_MS);

    loop {
        if should_stop.load(Ordering::SeqCst) {
            debug!("[engine] Stop signal received, exiting worker");
            break;
        }

        let first = match chunk_rx.recv_timeout(poll) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("[engine] Chunk queue closed, exiting worker");
                break;
            }
        };
        let mut batch = vec![first];
        batch.extend(chunk_rx.try_iter());
        if batch.len() > 1 {
            trace!("[engine] Draining backlog of {} chunks", batch.len());
        }

        let detected = {
            let mut pipeline = pipeline.lock();
            let last = batch.len() - 1;
            let mut detected = false;
            for (i, chunk) in batch.iter().enumerate() {
                if should_stop.load(Ordering::SeqCst) {
                    break;
                }
                detected |= pipeline.ingest(chunk, i == last).detected();
            }
            detected
        };

        if detected && !should_stop.load(Ordering::SeqCst) {
            listeners.notify();
        }
    }

    let mut pipeline = pipeline.lock();
    pipeline.stop();
    pipeline.unload_model();
    debug!("[engine] Worker exited");
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
