// Listening events and wake word listener fan-out
// Typed events go out on a bounded tokio channel; zero-payload listeners are called in order

use super::vad::VadEvent;
use crate::warn;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle state of the wake word engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// No session
    Idle,
    /// Model and microphone being prepared
    Initializing,
    /// Buffer filling and inference running
    Listening,
    /// Session ended by `stop()`
    Stopped,
    /// Model load failed during `start()`
    Failed,
}

/// Event emitted on the engine's event channel
///
/// Serialized as a tagged object, e.g.
/// `{"type":"wakeWordDetected","confidence":0.93,"timestampMs":1712}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ListeningEvent {
    SpeechStarted {
        timestamp_ms: u64,
    },
    SpeechEnded {
        timestamp_ms: u64,
    },
    SilenceDetected {
        duration_ms: u64,
        timestamp_ms: u64,
    },
    EnergyUpdate {
        energy: f32,
        timestamp_ms: u64,
    },
    WakeWordDetected {
        confidence: f32,
        timestamp_ms: u64,
    },
    StateChanged {
        from: EngineState,
        to: EngineState,
    },
    /// A recoverable failure inside the processing path (e.g. one inference)
    Error {
        message: String,
    },
}

impl ListeningEvent {
    /// Map a VAD transition onto the matching event
    pub fn from_vad(event: VadEvent, timestamp_ms: u64) -> Self {
        match event {
            VadEvent::SpeechStarted => Self::SpeechStarted { timestamp_ms },
            VadEvent::SpeechEnded => Self::SpeechEnded { timestamp_ms },
            VadEvent::SilenceDetected { duration_ms } => Self::SilenceDetected {
                duration_ms,
                timestamp_ms,
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Callback invoked for each wake word detection
pub type WakeWordListener = Box<dyn Fn() + Send + Sync>;

type SharedListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by `add_listener`, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of wake word listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<(ListenerId, SharedListener)>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: WakeWordListener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Arc::from(listener)));
        id
    }

    /// Returns false if the id was not registered
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call every listener in registration order
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    /// Returns the number of listeners that panicked.
    pub fn notify(&self) -> usize {
        call_isolated(&self.listeners)
    }
}

fn call_isolated(listeners: &[(ListenerId, SharedListener)]) -> usize {
    let mut failures = 0;
    for (id, listener) in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
            warn!("[engine] Wake word listener {:?} panicked", id);
            failures += 1;
        }
    }
    failures
}

/// A listener registry shared between the engine handle and its worker
///
/// `notify` calls listeners outside the lock, so a listener may add or
/// remove listeners without deadlocking.
#[derive(Debug, Clone, Default)]
pub struct SharedListeners {
    inner: Arc<Mutex<ListenerRegistry>>,
    panics: Arc<AtomicU64>,
}

impl SharedListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: WakeWordListener) -> ListenerId {
        self.inner.lock().add(listener)
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.inner.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Call the listeners registered at the moment of the call, in order
    ///
    /// Returns the number that panicked; the running total is kept in `panics()`.
    pub fn notify(&self) -> usize {
        let snapshot = self.inner.lock().listeners.clone();
        let failures = call_isolated(&snapshot);
        self.panics.fetch_add(failures as u64, Ordering::SeqCst);
        failures
    }

    /// Listener panics since creation or the last `reset_panics`
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::SeqCst)
    }

    pub fn reset_panics(&self) {
        self.panics.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_called_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();
        for n in 0..3 {
            let calls = calls.clone();
            registry.add(Box::new(move || calls.lock().unwrap().push(n)));
        }

        assert_eq!(registry.notify(), 0);
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::new();

        let c = calls.clone();
        registry.add(Box::new(move || c.lock().unwrap().push("first")));
        registry.add(Box::new(|| panic!("listener failure")));
        let c = calls.clone();
        registry.add(Box::new(move || c.lock().unwrap().push("third")));

        assert_eq!(registry.notify(), 1);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "third"]);

        // Registry stays usable after a panic
        assert_eq!(registry.notify(), 1);
        assert_eq!(calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_remove_listener() {
        let mut registry = ListenerRegistry::new();
        let a = registry.add(Box::new(|| {}));
        let b = registry.add(Box::new(|| {}));
        assert_ne!(a, b);

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(b));
        assert!(registry.is_empty());
        assert_eq!(registry.notify(), 0);
    }

    #[test]
    fn test_shared_listener_can_register_from_callback() {
        let shared = SharedListeners::new();
        let calls = Arc::new(Mutex::new(0));

        let inner = shared.clone();
        let c = calls.clone();
        shared.add(Box::new(move || {
            *c.lock().unwrap() += 1;
            inner.add(Box::new(|| {}));
        }));

        assert_eq!(shared.notify(), 0);
        assert_eq!(*calls.lock().unwrap(), 1);
        // Listener added during notify runs from the next notification on
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_event_serialization_is_tagged_camel_case() {
        let event = ListeningEvent::WakeWordDetected {
            confidence: 0.5,
            timestamp_ms: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "wakeWordDetected");
        assert_eq!(json["confidence"], 0.5);
        assert_eq!(json["timestampMs"], 42);

        let json = serde_json::to_value(ListeningEvent::StateChanged {
            from: EngineState::Initializing,
            to: EngineState::Listening,
        })
        .unwrap();
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["from"], "initializing");
        assert_eq!(json["to"], "listening");
    }

    #[test]
    fn test_from_vad_event() {
        assert_eq!(
            ListeningEvent::from_vad(VadEvent::SilenceDetected { duration_ms: 2010 }, 9),
            ListeningEvent::SilenceDetected {
                duration_ms: 2010,
                timestamp_ms: 9
            }
        );
        assert_eq!(
            ListeningEvent::from_vad(VadEvent::SpeechStarted, 1),
            ListeningEvent::SpeechStarted { timestamp_ms: 1 }
        );
    }
}
