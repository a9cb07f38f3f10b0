// Dedicated audio thread for microphone capture
//
// cpal streams are not Send, so the stream is created and dropped on one
// thread that owns a CpalBackend and takes commands over a channel.

use super::{AudioCaptureError, ChunkSink, CpalBackend};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Response from a Start command: the native device sample rate
pub type StartResponse = Result<u32, AudioCaptureError>;

/// Commands sent to the audio thread
pub enum AudioCommand {
    /// Start streaming chunks into `sink`
    Start {
        sink: ChunkSink,
        device_name: Option<String>,
        chunk_samples: usize,
        response_tx: Sender<StartResponse>,
    },
    /// Stop capturing; replies once the stream is dropped
    Stop(Sender<()>),
    /// Shutdown the audio thread
    Shutdown,
}

/// Handle to the audio capture thread
///
/// This handle is Send + Sync and can be safely shared across threads.
/// When dropped, the audio thread is gracefully shutdown.
pub struct AudioThreadHandle {
    sender: Sender<AudioCommand>,
    thread: Option<JoinHandle<()>>,
}

impl AudioThreadHandle {
    /// Spawn a new audio capture thread
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::channel();

        let thread = thread::spawn(move || {
            audio_thread_main(receiver);
        });

        Self {
            sender,
            thread: Some(thread),
        }
    }

    /// Start capture, blocking until the audio thread responds
    ///
    /// Returns the native sample rate of the opened device. If the named
    /// device is not found, the default device is used.
    #[must_use = "this returns a Result that should be handled"]
    pub fn start(
        &self,
        sink: ChunkSink,
        device_name: Option<String>,
        chunk_samples: usize,
    ) -> Result<u32, AudioThreadError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.sender
            .send(AudioCommand::Start {
                sink,
                device_name,
                chunk_samples,
                response_tx,
            })
            .map_err(|_| AudioThreadError::ThreadDisconnected)?;

        response_rx
            .recv()
            .map_err(|_| AudioThreadError::ThreadDisconnected)?
            .map_err(AudioThreadError::CaptureError)
    }

    /// Stop capture; no chunk is delivered after this returns
    #[must_use = "this returns a Result that should be handled"]
    pub fn stop(&self) -> Result<(), AudioThreadError> {
        let (response_tx, response_rx) = mpsc::channel();
        self.sender
            .send(AudioCommand::Stop(response_tx))
            .map_err(|_| AudioThreadError::ThreadDisconnected)?;

        response_rx
            .recv()
            .map_err(|_| AudioThreadError::ThreadDisconnected)
    }

    /// Ask the audio thread to exit without waiting for it
    pub fn shutdown(&self) -> Result<(), AudioThreadError> {
        self.sender
            .send(AudioCommand::Shutdown)
            .map_err(|_| AudioThreadError::ThreadDisconnected)
    }
}

impl Drop for AudioThreadHandle {
    /// Sends a Shutdown command and waits for the thread to exit.
    fn drop(&mut self) {
        // Ignore errors if thread already exited
        let _ = self.sender.send(AudioCommand::Shutdown);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Errors from audio thread operations
#[derive(Debug, Clone, PartialEq)]
pub enum AudioThreadError {
    /// The audio thread has disconnected
    ThreadDisconnected,
    /// Audio capture failed
    CaptureError(AudioCaptureError),
}

impl std::fmt::Display for AudioThreadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioThreadError::ThreadDisconnected => write!(f, "Audio thread disconnected"),
            AudioThreadError::CaptureError(e) => write!(f, "Audio capture error: {}", e),
        }
    }
}

impl std::error::Error for AudioThreadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AudioThreadError::CaptureError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AudioThreadError> for AudioCaptureError {
    fn from(err: AudioThreadError) -> Self {
        match err {
            AudioThreadError::CaptureError(inner) => inner,
            AudioThreadError::ThreadDisconnected => {
                AudioCaptureError::StreamError("audio thread disconnected".to_string())
            }
        }
    }
}

/// Main loop for the audio thread
#[cfg_attr(coverage_nightly, coverage(off))]
fn audio_thread_main(receiver: Receiver<AudioCommand>) {
    crate::info!("[audio] Audio thread started");
    let mut backend = CpalBackend::new();

    // Block until a command arrives; exit when every handle is gone
    while let Ok(command) = receiver.recv() {
        match command {
            AudioCommand::Start {
                sink,
                device_name,
                chunk_samples,
                response_tx,
            } => {
                crate::debug!("[audio] Received START command, device={:?}", device_name);
                let result = backend.start(sink, device_name, chunk_samples);
                match &result {
                    Ok(sample_rate) => {
                        crate::info!("[audio] Capture started at {} Hz", sample_rate)
                    }
                    Err(e) => crate::error!("[audio] Capture failed to start: {}", e),
                }
                // Ignore if receiver dropped
                let _ = response_tx.send(result);
            }
            AudioCommand::Stop(response_tx) => {
                crate::debug!("[audio] Received STOP command");
                backend.stop();
                let _ = response_tx.send(());
            }
            AudioCommand::Shutdown => {
                crate::debug!("[audio] Received SHUTDOWN command");
                backend.stop();
                break;
            }
        }
    }
    crate::info!("[audio] Audio thread exiting");
}

#[cfg(test)]
#[path = "thread_test.rs"]
mod tests;
