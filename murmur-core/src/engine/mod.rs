//! `MurmurEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! MurmurEngine::new()
//!     └─► warm_up()          → recognizer loaded, status = WarmingUp → Idle
//!         └─► start()        → ring allocated, capture + processing loops
//!             │                 spawned, status = Listening
//!             └─► stop()     → running=false, loops drain and exit,
//!                              status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state
//! returns an error rather than panicking.
//!
//! ## Threading
//!
//! Both loops run on `tokio::task::spawn_blocking` threads against the one
//! shared [`AudioRing`], allocated here at start time — no process-wide
//! statics, no reallocation once the loops are running. `cpal::Stream` is
//! `!Send` on Windows/macOS (COM / CoreAudio thread affinity), so the audio
//! source is opened *inside* the capture thread; a sync mpsc channel
//! propagates open success/failure back to the `start()` caller.
//!
//! A single `Arc<AtomicBool>` running flag, polled by both loops at each
//! iteration boundary, is the only cancellation mechanism.

pub mod capture;
pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    audio::AudioSource,
    buffering::AudioRing,
    config::EngineConfig,
    error::{MurmurError, Result},
    events::{AudioActivityEvent, EngineStatus, EngineStatusEvent, SpeechEvent},
    inference::RecognizerHandle,
    vad::{energy::EnergyVad, VoiceActivityDetector},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Shared counters updated by both loops, snapshotted for observability.
pub struct EngineDiagnostics {
    pub samples_captured: AtomicUsize,
    pub samples_evicted: AtomicUsize,
    pub chunks_processed: AtomicUsize,
    pub speech_chunks: AtomicUsize,
    pub segments_started: AtomicUsize,
    pub partials_emitted: AtomicUsize,
    pub finals_emitted: AtomicUsize,
    pub inference_errors: AtomicUsize,
}

impl Default for EngineDiagnostics {
    fn default() -> Self {
        Self {
            samples_captured: AtomicUsize::new(0),
            samples_evicted: AtomicUsize::new(0),
            chunks_processed: AtomicUsize::new(0),
            speech_chunks: AtomicUsize::new(0),
            segments_started: AtomicUsize::new(0),
            partials_emitted: AtomicUsize::new(0),
            finals_emitted: AtomicUsize::new(0),
            inference_errors: AtomicUsize::new(0),
        }
    }
}

impl EngineDiagnostics {
    pub fn reset(&self) {
        self.samples_captured.store(0, Ordering::Relaxed);
        self.samples_evicted.store(0, Ordering::Relaxed);
        self.chunks_processed.store(0, Ordering::Relaxed);
        self.speech_chunks.store(0, Ordering::Relaxed);
        self.segments_started.store(0, Ordering::Relaxed);
        self.partials_emitted.store(0, Ordering::Relaxed);
        self.finals_emitted.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            samples_evicted: self.samples_evicted.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            speech_chunks: self.speech_chunks.load(Ordering::Relaxed),
            segments_started: self.segments_started.load(Ordering::Relaxed),
            partials_emitted: self.partials_emitted.load(Ordering::Relaxed),
            finals_emitted: self.finals_emitted.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_captured: usize,
    pub samples_evicted: usize,
    pub chunks_processed: usize,
    pub speech_chunks: usize,
    pub segments_started: usize,
    pub partials_emitted: usize,
    pub finals_emitted: usize,
    pub inference_errors: usize,
}

/// The top-level engine handle.
///
/// `MurmurEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<MurmurEngine>` to share between the host and
/// event-forwarding tasks.
pub struct MurmurEngine {
    config: EngineConfig,
    recognizer: RecognizerHandle,
    /// `true` while capture + processing are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written via Mutex, read from host commands).
    status: Arc<Mutex<EngineStatus>>,
    speech_tx: broadcast::Sender<SpeechEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    /// Monotonically increasing speech event sequence counter.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<EngineDiagnostics>,
}

impl MurmurEngine {
    /// Create a new engine. Does not start capturing — call `warm_up()`
    /// then `start()`.
    pub fn new(config: EngineConfig, recognizer: RecognizerHandle) -> Self {
        let (speech_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            recognizer,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            speech_tx,
            status_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(EngineDiagnostics::default()),
        }
    }

    /// Warm up the recognizer (load weights, run a dummy inference).
    ///
    /// Call once at application startup, before `start()`.
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(EngineStatus::WarmingUp, None);
        info!("warming up recognizer");
        self.recognizer.0.lock().warm_up()?;
        self.set_status(EngineStatus::Idle, None);
        info!("recognizer ready");
        Ok(())
    }

    /// Start capture from the default microphone.
    #[cfg(feature = "audio-cpal")]
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start capture from a preferred input device name, falling back to
    /// the default device when not found.
    #[cfg(feature = "audio-cpal")]
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        let target_rate = self.config.sample_rate;
        self.start_with_source(move |running| {
            crate::audio::CpalSource::open(
                target_rate,
                running,
                preferred_input_device.as_deref(),
            )
        })
    }

    /// Start the engine against any [`AudioSource`].
    ///
    /// `open_source` runs on the capture thread (audio backends are often
    /// `!Send`); it receives the running flag so callback-driven sources can
    /// gate themselves on shutdown. Blocks until the source is confirmed
    /// open (or failed), then returns while both loops continue in the
    /// background.
    ///
    /// # Errors
    /// - `MurmurError::AlreadyRunning` if already started.
    /// - Whatever `open_source` returned on failure.
    pub fn start_with_source<S, F>(&self, open_source: F) -> Result<()>
    where
        S: AudioSource + 'static,
        F: FnOnce(Arc<AtomicBool>) -> Result<S> + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MurmurError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.set_status(EngineStatus::Listening, None);

        let ring = AudioRing::with_capacity(self.config.ring_capacity);

        // ── Capture loop ─────────────────────────────────────────────────
        let capture_ctx = capture::CaptureContext {
            chunk_size: self.config.chunk_size,
            ring: ring.clone(),
            running: Arc::clone(&self.running),
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        let running_for_open = Arc::clone(&self.running);

        // Sync oneshot: capture thread signals source open success/failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            // Source must be opened on THIS thread — cpal streams are !Send.
            let mut source = match open_source(Arc::clone(&running_for_open)) {
                Ok(s) => {
                    let _ = open_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running_for_open.store(false, Ordering::SeqCst);
                    return;
                }
            };

            capture::run(&mut source, capture_ctx);

            // Source drops here, releasing the audio device on this thread.
        });

        match open_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                // Channel closed before a message — capture thread panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("capture failed to start".into()));
                return Err(MurmurError::Other(anyhow::anyhow!(
                    "capture task died unexpectedly"
                )));
            }
        }

        // ── Processing loop ──────────────────────────────────────────────
        let vad: Box<dyn VoiceActivityDetector> =
            Box::new(EnergyVad::new(self.config.vad_start_threshold));
        let pipeline_ctx = pipeline::PipelineContext {
            config: self.config.clone(),
            recognizer: self.recognizer.clone(),
            vad,
            ring,
            running: Arc::clone(&self.running),
            speech_tx: self.speech_tx.clone(),
            activity_tx: self.activity_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        tokio::task::spawn_blocking(move || pipeline::run(pipeline_ctx));

        info!("engine started — listening");
        Ok(())
    }

    /// Stop capture and processing.
    ///
    /// The processing loop flushes any in-progress segment before exiting.
    ///
    /// # Errors
    /// `MurmurError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MurmurError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to segment lifecycle / transcript events.
    pub fn subscribe_speech(&self) -> broadcast::Receiver<SpeechEvent> {
        self.speech_tx.subscribe()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-chunk voice activity events (RMS + decision).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of loop counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
