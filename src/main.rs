// wakeword-listen: run the wake word engine on the microphone or a WAV file
// Prints every engine event as one JSON line on stdout

// Exclude entire file from coverage - binary entry point cannot be unit tested
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wakeword_pipeline::audio::{list_input_devices, CpalSource, SampleSource, WavFileSource};
use wakeword_pipeline::listening::{OnnxModelLoader, WakeWordEngine};
use wakeword_pipeline::Settings;

/// Always-listening wake word detector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML settings file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the ONNX wake word model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Replay a 16kHz WAV file instead of using the microphone
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Replay the WAV file as fast as possible instead of in real time
    #[arg(long, requires = "wav")]
    fast: bool,

    /// Audio device to use (see --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Detection threshold (0.0 to 1.0)
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Minimum spacing between detections in milliseconds
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// VAD sensitivity multiplier
    #[arg(long)]
    sensitivity: Option<f32>,

    /// Print per-chunk energy events
    #[arg(long)]
    energy: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List available audio input devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings, Box<dyn std::error::Error>> {
        let mut settings = match self.config.as_deref() {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };
        if let Some(model) = &self.model {
            settings.model.path = model.clone();
        }
        if let Some(device) = &self.device {
            settings.audio.device_name = Some(device.clone());
        }
        if let Some(threshold) = self.threshold {
            settings.detection.threshold = threshold;
        }
        if self.cooldown_ms.is_some() {
            settings.detection.cooldown_ms = self.cooldown_ms;
        }
        if let Some(sensitivity) = self.sensitivity {
            settings.vad.sensitivity = sensitivity;
        }
        if self.energy {
            settings.events.energy_updates = true;
        }
        if self.fast {
            settings.audio.realtime_replay = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    if cli.list_devices {
        for device in list_input_devices() {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    let settings = cli.settings()?;
    info!("Using model {}", settings.model.path.display());

    let finished = Arc::new(AtomicBool::new(false));
    let source: Box<dyn SampleSource> = match &cli.wav {
        Some(path) => {
            let source = WavFileSource::new(path, settings.audio.realtime_replay)
                .with_chunk_size(settings.audio.chunk_samples);
            let done = source.finished_flag();
            let finished = finished.clone();
            // Forward end-of-file into the shared shutdown flag
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                finished.store(true, Ordering::SeqCst);
            });
            Box::new(source)
        }
        None => Box::new(CpalSource::with_chunk_size(
            settings.audio.device_name.clone(),
            settings.audio.chunk_samples,
        )),
    };

    let loader = OnnxModelLoader::new(settings.model.path.clone());
    let mut engine = WakeWordEngine::new(settings.engine_config(), source, Box::new(loader))?;
    let mut events = engine.subscribe_events();

    let interrupted = finished.clone();
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
    })?;

    if let Err(e) = engine.start() {
        error!("Failed to start: {}", e);
        return Err(e.into());
    }

    while !finished.load(Ordering::SeqCst) {
        while let Ok(event) = events.try_recv() {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize event: {}", e),
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the worker drain the tail of a WAV replay
    std::thread::sleep(Duration::from_millis(200));
    engine.stop();
    while let Ok(event) = events.try_recv() {
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{}", line);
        }
    }

    let stats = engine.stats();
    info!(
        "Processed {} chunks, {} detections, {} dropped",
        stats.chunks_processed, stats.detections, stats.chunks_dropped
    );
    Ok(())
}
