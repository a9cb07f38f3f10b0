use super::*;
use crate::features::FeatureMatrix;
use crate::listening::classifier::WakeWordModel;
use crate::listening::clock::{ManualClock, SystemClock};
use crate::listening::vad::VadEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const CHUNK: usize = 480;
/// Chunks needed to fill the 1.5s window
const WARMUP_CHUNKS: usize = WINDOW_SAMPLES / CHUNK;

/// Model whose output the test can change between chunks
struct DialModel {
    confidence: Arc<Mutex<f32>>,
    shapes: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl WakeWordModel for DialModel {
    fn predict(&mut self, features: &FeatureMatrix) -> Result<f32, ClassifierError> {
        self.shapes
            .lock()
            .unwrap()
            .push((features.bands(), features.frames()));
        Ok(*self.confidence.lock().unwrap())
    }
}

struct Harness {
    pipeline: DetectionPipeline,
    clock: ManualClock,
    confidence: Arc<Mutex<f32>>,
    shapes: Arc<Mutex<Vec<(usize, usize)>>>,
    timestamp_ms: u64,
}

impl Harness {
    fn new(detection: DetectionConfig) -> Self {
        let clock = ManualClock::new(0);
        let mut pipeline = DetectionPipeline::new(
            VadConfig::default(),
            FeatureConfig::default(),
            detection,
            Arc::new(clock.clone()),
        )
        .unwrap();

        let confidence = Arc::new(Mutex::new(0.0));
        let shapes = Arc::new(Mutex::new(Vec::new()));
        pipeline.classifier_mut().install(Box::new(DialModel {
            confidence: confidence.clone(),
            shapes: shapes.clone(),
        }));
        pipeline.start();

        Self {
            pipeline,
            clock,
            confidence,
            shapes,
            timestamp_ms: 0,
        }
    }

    fn set_confidence(&self, value: f32) {
        *self.confidence.lock().unwrap() = value;
    }

    fn chunk(&mut self, value: f32) -> AudioChunk {
        self.timestamp_ms += 30;
        self.clock.set(self.timestamp_ms);
        AudioChunk::new(vec![value; CHUNK], self.timestamp_ms)
    }

    fn feed(&mut self, value: f32) -> ChunkOutcome {
        let chunk = self.chunk(value);
        self.pipeline.process_chunk(&chunk)
    }

    fn warm_up(&mut self) {
        for _ in 0..WARMUP_CHUNKS {
            self.feed(0.0);
        }
    }
}

fn counting_listener(pipeline: &DetectionPipeline) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    pipeline.listeners().add(Box::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
    }));
    count
}

#[test]
fn test_inference_skipped_until_window_full() {
    let mut h = Harness::new(DetectionConfig::default());
    h.set_confidence(0.9);

    for _ in 0..WARMUP_CHUNKS - 1 {
        assert_eq!(h.feed(0.0).inference, InferenceOutcome::Underrun);
    }
    assert_eq!(
        h.feed(0.0).inference,
        InferenceOutcome::Scored {
            confidence: 0.9,
            detected: true
        }
    );

    let stats = h.pipeline.stats();
    assert_eq!(stats.inferences_skipped_underrun, (WARMUP_CHUNKS - 1) as u64);
    assert_eq!(stats.inferences_run, 1);
    assert_eq!(stats.chunks_processed, WARMUP_CHUNKS as u64);
}

#[test]
fn test_model_receives_full_feature_matrix() {
    let mut h = Harness::new(DetectionConfig::default());
    h.warm_up();
    assert_eq!(*h.shapes.lock().unwrap(), vec![(16, 96)]);
}

#[test]
fn test_inference_runs_on_every_chunk_once_warm() {
    let mut h = Harness::new(DetectionConfig::default());
    h.warm_up();
    for _ in 0..5 {
        h.feed(0.0);
    }
    assert_eq!(h.pipeline.stats().inferences_run, 6);
}

#[test]
fn test_threshold_is_strictly_greater() {
    let mut h = Harness::new(DetectionConfig::default());
    let count = counting_listener(&h.pipeline);
    h.set_confidence(0.5);
    h.warm_up();
    h.feed(0.0);

    assert_eq!(count.load(Ordering::SeqCst), 0);

    h.set_confidence(0.5001);
    let outcome = h.feed(0.0);
    assert!(matches!(
        outcome.inference,
        InferenceOutcome::Scored { detected: true, .. }
    ));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sustained_confidence_fires_every_chunk_without_cooldown() {
    let mut h = Harness::new(DetectionConfig::default());
    let count = counting_listener(&h.pipeline);
    h.set_confidence(0.95);
    h.warm_up();
    h.feed(0.0);
    h.feed(0.0);

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(h.pipeline.stats().detections, 3);
}

#[test]
fn test_cooldown_suppresses_close_detections() {
    let mut h = Harness::new(DetectionConfig {
        threshold: 0.5,
        cooldown_ms: Some(100),
    });
    let count = counting_listener(&h.pipeline);
    h.set_confidence(0.95);
    h.warm_up(); // fires
    h.feed(0.0); // +30ms
    h.feed(0.0); // +60ms
    h.feed(0.0); // +90ms
    assert_eq!(count.load(Ordering::SeqCst), 1);

    h.feed(0.0); // +120ms
    assert_eq!(count.load(Ordering::SeqCst), 2);

    let stats = h.pipeline.stats();
    assert_eq!(stats.detections, 2);
    assert_eq!(stats.detections_suppressed, 3);
}

#[test]
fn test_listeners_run_in_order_and_survive_panics() {
    let mut h = Harness::new(DetectionConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = order.clone();
    h.pipeline
        .listeners()
        .add(Box::new(move || o.lock().unwrap().push(1)));
    h.pipeline
        .listeners()
        .add(Box::new(|| panic!("listener failure")));
    let o = order.clone();
    h.pipeline
        .listeners()
        .add(Box::new(move || o.lock().unwrap().push(3)));

    h.set_confidence(0.9);
    h.warm_up();

    assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    assert_eq!(h.pipeline.stats().listener_panics, 1);
}

#[test]
fn test_missing_model_fails_loudly() {
    let mut h = Harness::new(DetectionConfig::default());
    let (tx, mut rx) = tokio_mpsc::channel(8);
    h.pipeline.set_event_sender(Some(tx));
    h.pipeline.unload_model();

    for _ in 0..WARMUP_CHUNKS - 1 {
        h.feed(0.0);
    }
    let outcome = h.feed(0.0);
    assert_eq!(
        outcome.inference,
        InferenceOutcome::Failed(ClassifierError::ModelNotReady)
    );
    assert_eq!(h.pipeline.stats().inference_errors, 1);

    let mut saw_error = false;
    while let Ok(event) = rx.try_recv() {
        if let ListeningEvent::Error { message } = event {
            assert!(message.contains("not loaded"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[test]
fn test_batch_runs_vad_on_every_chunk_and_one_inference() {
    let mut h = Harness::new(DetectionConfig::default());
    h.warm_up();
    h.pipeline.reset_stats();

    let batch: Vec<AudioChunk> = (0..4).map(|_| h.chunk(0.0)).collect();
    let outcomes = h.pipeline.process_batch(&batch);

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes[..3]
        .iter()
        .all(|o| o.inference == InferenceOutcome::Skipped));
    assert!(matches!(
        outcomes[3].inference,
        InferenceOutcome::Scored { .. }
    ));
    let stats = h.pipeline.stats();
    assert_eq!(stats.chunks_processed, 4);
    assert_eq!(stats.inferences_run, 1);
    assert_eq!(stats.inferences_skipped_backlog, 3);
}

#[test]
fn test_vad_transitions_forwarded_as_events() {
    let mut h = Harness::new(DetectionConfig::default());
    let (tx, mut rx) = tokio_mpsc::channel(64);
    h.pipeline.set_event_sender(Some(tx));

    // Quiet past the 300ms hangover, then speech
    let mut ended_at = None;
    for _ in 0..12 {
        let outcome = h.feed(0.0);
        if outcome.vad.event == Some(VadEvent::SpeechEnded) {
            ended_at = Some(h.timestamp_ms);
        }
    }
    let outcome = h.feed(0.5);
    assert_eq!(outcome.vad.event, Some(VadEvent::SpeechStarted));

    let events: Vec<ListeningEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(
        events,
        vec![
            ListeningEvent::SpeechEnded {
                timestamp_ms: ended_at.unwrap()
            },
            ListeningEvent::SpeechStarted {
                timestamp_ms: h.timestamp_ms
            },
        ]
    );
}

#[test]
fn test_unpaced_replay_times_vad_by_chunk_timestamps() {
    let mut pipeline = DetectionPipeline::new(
        VadConfig::default(),
        FeatureConfig::default(),
        DetectionConfig::default(),
        Arc::new(SystemClock),
    )
    .unwrap()
    .with_chunk_timestamps(true);
    let (tx, mut rx) = tokio_mpsc::channel(64);
    pipeline.set_event_sender(Some(tx));
    pipeline.start();

    // 3.3s of audio delivered in a few wall-clock milliseconds. The first
    // quiet chunk still carries pre-emphasis memory and counts as speech.
    for i in 1..=110u64 {
        let value = if i <= 10 { 0.5 } else { 0.0 };
        pipeline.ingest(&AudioChunk::new(vec![value; CHUNK], i * 30), false);
    }

    let events: Vec<ListeningEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(
        events,
        vec![
            ListeningEvent::SpeechEnded { timestamp_ms: 660 },
            ListeningEvent::SilenceDetected {
                duration_ms: 2010,
                timestamp_ms: 2670
            },
        ]
    );
}

#[test]
fn test_window_grows_to_fit_feature_frames() {
    let features = FeatureConfig {
        frames: 200,
        ..Default::default()
    };
    let needed = features.samples_for_all_frames();
    assert!(needed > WINDOW_SAMPLES);

    let pipeline = DetectionPipeline::new(
        VadConfig::default(),
        features,
        DetectionConfig::default(),
        Arc::new(ManualClock::new(0)),
    )
    .unwrap();
    assert_eq!(pipeline.buffer().capacity(), needed);

    let default_pipeline = Harness::new(DetectionConfig::default()).pipeline;
    assert_eq!(default_pipeline.buffer().capacity(), WINDOW_SAMPLES);
}

#[test]
fn test_ingest_leaves_listeners_to_caller() {
    let mut h = Harness::new(DetectionConfig::default());
    let count = counting_listener(&h.pipeline);
    h.set_confidence(0.9);
    for _ in 0..WARMUP_CHUNKS - 1 {
        h.feed(0.0);
    }

    let chunk = h.chunk(0.0);
    let outcome = h.pipeline.ingest(&chunk, true);
    assert!(outcome.detected());
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(h.pipeline.stats().detections, 1);

    h.pipeline.listeners().notify();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_energy_events_are_opt_in() {
    let mut h = Harness::new(DetectionConfig::default());
    let (tx, mut rx) = tokio_mpsc::channel(64);
    h.pipeline.set_event_sender(Some(tx));
    h.feed(0.0);
    assert!(rx.try_recv().is_err());

    let clock = ManualClock::new(0);
    let mut pipeline = DetectionPipeline::new(
        VadConfig::default(),
        FeatureConfig::default(),
        DetectionConfig::default(),
        Arc::new(clock),
    )
    .unwrap()
    .with_energy_events(true);
    let (tx, mut rx) = tokio_mpsc::channel(64);
    pipeline.set_event_sender(Some(tx));
    pipeline.start();
    pipeline.process_chunk(&AudioChunk::new(vec![0.0; CHUNK], 7));

    assert_eq!(
        rx.try_recv().unwrap(),
        ListeningEvent::EnergyUpdate {
            energy: 0.0,
            timestamp_ms: 7
        }
    );
}

#[test]
fn test_full_event_channel_does_not_block() {
    let mut h = Harness::new(DetectionConfig::default());
    let (tx, _rx) = tokio_mpsc::channel(1);
    h.pipeline.set_event_sender(Some(tx));
    h.set_confidence(0.9);
    h.warm_up();
    h.feed(0.0);
    h.feed(0.0);
    assert_eq!(h.pipeline.stats().detections, 3);
}

#[test]
fn test_stop_clears_window() {
    let mut h = Harness::new(DetectionConfig::default());
    h.warm_up();
    assert!(h.pipeline.buffer().is_full());

    h.pipeline.stop();
    assert!(h.pipeline.buffer().is_empty());
    assert!(!h.pipeline.vad().is_running());

    h.pipeline.start();
    assert_eq!(h.feed(0.0).inference, InferenceOutcome::Underrun);
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let bad_vad = VadConfig {
        sensitivity: 0.0,
        ..Default::default()
    };
    let result = DetectionPipeline::new(
        bad_vad,
        FeatureConfig::default(),
        DetectionConfig::default(),
        Arc::new(ManualClock::new(0)),
    );
    assert!(matches!(result, Err(PipelineError::Vad(_))));

    let bad_features = FeatureConfig {
        mel_bands: 0,
        ..Default::default()
    };
    let result = DetectionPipeline::new(
        VadConfig::default(),
        bad_features,
        DetectionConfig::default(),
        Arc::new(ManualClock::new(0)),
    );
    assert!(matches!(result, Err(PipelineError::Features(_))));
}

#[test]
fn test_average_inference_time_tracked() {
    let mut h = Harness::new(DetectionConfig::default());
    h.warm_up();
    h.feed(0.0);
    let stats = h.pipeline.stats();
    assert!(stats.average_inference_ms >= 0.0);

    h.pipeline.reset_stats();
    assert_eq!(h.pipeline.stats(), EngineStats::default());
}
