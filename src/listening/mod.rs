// Listening module for always-on wake word detection
// Sliding window, voice activity detection, classification and the engine that ties them together

mod buffer;
pub mod classifier;
pub mod clock;
mod engine;
mod events;
mod pipeline;
pub mod vad;

pub use buffer::SlidingAudioBuffer;
pub use classifier::{
    ClassifierError, ModelLoader, OnnxModelLoader, OnnxWakeWordModel, WakeWordClassifier,
    WakeWordModel,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, EngineError, WakeWordEngine};
pub use events::{
    EngineState, ListenerId, ListenerRegistry, ListeningEvent, SharedListeners, WakeWordListener,
};
pub use pipeline::{
    ChunkOutcome, DetectionConfig, DetectionPipeline, EngineStats, InferenceOutcome,
    PipelineError,
};
pub use vad::{
    calculate_rms, SpeechPhase, VadCallbacks, VadConfig, VadConfigUpdate, VadError, VadEvent,
    VadResult, VadStats, VoiceActivityDetector,
};
